#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! StreamSuite API Server
//!
//! Serves the billing endpoints: checkout initiation and Stripe webhook
//! reconciliation.

use streamsuite_billing::BillingService;
use streamsuite_shared::{create_migration_pool, create_pool, run_migrations};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamsuite_api::{routes::create_router, AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,streamsuite_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!(
        "Starting StreamSuite API Server v{}",
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded");

    // Create database pool (pooler URL for regular queries)
    tracing::info!("Connecting to database...");
    let pool = create_pool(&config.database_url).await?;
    tracing::info!("Database connection established");

    // Run migrations using the direct URL (bypasses PgBouncer, which doesn't
    // support prepared statements)
    tracing::info!("Running database migrations...");
    let migration_url = config
        .database_direct_url
        .as_ref()
        .unwrap_or(&config.database_url);
    let migration_pool = create_migration_pool(migration_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;
    tracing::info!("Database migrations complete");

    // Billing service
    let billing = BillingService::from_env(pool.clone())?;
    tracing::info!("Stripe billing service initialized");

    let state = AppState::new(pool, config.clone(), billing);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    tracing::info!(bind_address = %config.bind_address, "API server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
