//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use streamsuite_billing::BillingService;

use crate::{auth::AuthState, config::Config};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config, billing: BillingService) -> Self {
        Self {
            pool,
            config,
            billing: Arc::new(billing),
        }
    }

    /// State handed to the auth middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState::new(&self.config.jwt_secret)
    }
}
