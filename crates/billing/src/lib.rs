// Billing crate clippy configuration
// These are intentional patterns in this crate:
#![allow(clippy::too_many_arguments)] // Some Stripe operations require many parameters
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! StreamSuite Billing Module
//!
//! Handles the plan catalog, credit ledger, Stripe checkout, and webhook
//! reconciliation.
//!
//! ## Features
//!
//! - **Plan Catalog**: Static tier economics and feature gating
//! - **Credit Ledger**: Regular/bonus/batch pools with an append-only transaction log
//! - **Checkout**: Stripe Checkout sessions for paid plans
//! - **Webhooks**: Reconcile subscription state from Stripe events, processed-once
//! - **Audit Log**: Structured PREFIX-NNNN event codes for every billing action

pub mod audit;
pub mod checkout;
pub mod client;
pub mod customer;
pub mod error;
pub mod event_codes;
pub mod ledger;
pub mod plans;
pub mod webhooks;


// Audit
pub use audit::{AuditEntry, AuditLog, AuditLogger};

// Checkout
pub use checkout::{BillingInterval, CheckoutOptions, CheckoutResponse, CheckoutService};

// Client
pub use client::{PriceIds, StripeClient, StripeConfig};

// Customer
pub use customer::CustomerService;

// Error
pub use error::{BillingError, BillingResult};

// Event codes
pub use event_codes::{generate_event_id, EventCodeInfo, Severity};

// Ledger
pub use ledger::{
    renewed_balance, BatchCreditTransaction, CreditBalance, CreditLedger, CreditTransaction,
};

// Plans
pub use plans::{
    can_access_feature, get_plan, get_plan_by_name, minimum_plan_for_feature, Feature,
    PlanDefinition,
};

// Webhooks
pub use webhooks::WebhookHandler;

use sqlx::PgPool;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub audit: AuditLogger,
    pub checkout: CheckoutService,
    pub customer: CustomerService,
    pub ledger: CreditLedger,
    pub webhooks: WebhookHandler,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::with_client(stripe, pool))
    }

    /// Create a new billing service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        Self::with_client(StripeClient::new(config), pool)
    }

    fn with_client(stripe: StripeClient, pool: PgPool) -> Self {
        Self {
            audit: AuditLogger::new(pool.clone()),
            checkout: CheckoutService::new(stripe.clone(), pool.clone()),
            customer: CustomerService::new(stripe.clone(), pool.clone()),
            ledger: CreditLedger::new(pool.clone()),
            webhooks: WebhookHandler::new(stripe, pool),
        }
    }
}
