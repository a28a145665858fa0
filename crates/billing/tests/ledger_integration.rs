//! Integration tests for the credit ledger and webhook reconciliation
//!
//! These tests verify ledger atomicity and the processed-once webhook
//! guarantees against a real Postgres database.
//!
//! ## Running Tests
//! ```bash
//! export DATABASE_URL="postgres://localhost/streamsuite_test"
//! cargo test --test ledger_integration -- --ignored --test-threads=1
//! ```

use sqlx::PgPool;
use std::sync::Arc;
use time::OffsetDateTime;
use uuid::Uuid;

use streamsuite_billing::{
    BillingError, BillingService, CreditLedger, PriceIds, StripeConfig,
};
use streamsuite_shared::SubscriptionTier;

// ============================================================================
// Test Utilities
// ============================================================================

async fn setup_pool() -> PgPool {
    let database_url =
        std::env::var("DATABASE_URL").expect("DATABASE_URL must be set for integration tests");

    sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to test database")
}

fn test_stripe_config() -> StripeConfig {
    StripeConfig {
        secret_key: std::env::var("STRIPE_SECRET_KEY")
            .unwrap_or_else(|_| "sk_test_placeholder".to_string()),
        webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
            .unwrap_or_else(|_| "whsec_test_secret".to_string()),
        price_ids: PriceIds {
            starter: "price_test_starter".to_string(),
            pro: "price_test_pro".to_string(),
            growth: "price_test_growth".to_string(),
            agency: "price_test_agency".to_string(),
            starter_yearly: None,
            pro_yearly: None,
            growth_yearly: None,
            agency_yearly: None,
        },
        app_base_url: "http://localhost:3000".to_string(),
    }
}

fn setup_billing(pool: PgPool) -> BillingService {
    BillingService::new(test_stripe_config(), pool)
}

/// Create a test profile on a given tier with given pool balances
async fn create_test_profile(
    pool: &PgPool,
    tier: &str,
    credits: i64,
    bonus_credits: i64,
    use_bonus_first: bool,
) -> Uuid {
    let user_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO profiles
            (id, email, subscription_tier, subscription_status, credits,
             bonus_credits, batch_credits, use_bonus_first, created_at, updated_at)
        VALUES ($1, $2, $3, 'active', $4, $5, 0, $6, NOW(), NOW())
        "#,
    )
    .bind(user_id)
    .bind(format!("test-{}@example.com", user_id))
    .bind(tier)
    .bind(credits)
    .bind(bonus_credits)
    .bind(use_bonus_first)
    .execute(pool)
    .await
    .expect("Failed to create test profile");

    user_id
}

/// Cleanup test data after test completion
async fn cleanup_test_data(pool: &PgPool, user_id: Uuid) {
    // Ignore errors during cleanup
    sqlx::query("DELETE FROM credit_transactions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM batch_credit_transactions WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM audit_logs WHERE user_id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();
    sqlx::query("DELETE FROM profiles WHERE id = $1")
        .bind(user_id)
        .execute(pool)
        .await
        .ok();
}

// ============================================================================
// Ledger atomicity
// ============================================================================

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_deduct_over_balance_leaves_state_untouched() {
    let pool = setup_pool().await;
    let ledger = CreditLedger::new(pool.clone());
    let user_id = create_test_profile(&pool, "starter", 3, 0, false).await;

    let result = ledger
        .deduct(user_id, 5, "workflow generation", None, None)
        .await;
    assert!(matches!(
        result,
        Err(BillingError::InsufficientCredits { requested: 5, .. })
    ));

    let balance = ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.credits, 3);

    let transactions = ledger.recent_transactions(user_id, 10).await.unwrap();
    assert!(transactions.is_empty(), "failed deduction must not log");

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_concurrent_deductions_never_overdraw() {
    let pool = setup_pool().await;
    let ledger = Arc::new(CreditLedger::new(pool.clone()));
    // 10 credits, 20 concurrent 1-credit deductions: exactly 10 may succeed
    let user_id = create_test_profile(&pool, "pro", 10, 0, false).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = Arc::clone(&ledger);
        handles.push(tokio::spawn(async move {
            ledger
                .deduct(user_id, 1, &format!("concurrent generation {}", i), None, None)
                .await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 10);

    let balance = ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.credits, 0);

    // Replaying the log from the starting balance must land on the stored
    // balance, and every row's balance_after must match the running sum.
    let mut transactions = ledger.recent_transactions(user_id, 50).await.unwrap();
    transactions.reverse();
    assert_eq!(transactions.len(), 10);

    let mut running = 10_i64;
    for txn in &transactions {
        running += txn.amount;
        assert_eq!(txn.balance_after, running);
    }
    assert_eq!(running, balance.credits);

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_bonus_first_preference_and_no_split() {
    let pool = setup_pool().await;
    let ledger = CreditLedger::new(pool.clone());
    let user_id = create_test_profile(&pool, "pro", 10, 4, true).await;

    // bonus preferred but only 4; the 5-credit deduction draws from regular
    ledger
        .deduct(user_id, 5, "generation", None, None)
        .await
        .unwrap();
    let balance = ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.credits, 5);
    assert_eq!(balance.bonus_credits, 4);

    // neither pool covers 8 even though they do combined
    let result = ledger.deduct(user_id, 8, "generation", None, None).await;
    assert!(matches!(
        result,
        Err(BillingError::InsufficientCredits { .. })
    ));
    let balance = ledger.get_balance(user_id).await.unwrap();
    assert_eq!((balance.credits, balance.bonus_credits), (5, 4));

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_renewal_applies_rollover_and_batch_reset() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    // growth user who banked 300 credits and spent all batch credits
    let user_id = create_test_profile(&pool, "growth", 300, 0, false).await;

    billing
        .webhooks
        .apply_renewal(user_id, SubscriptionTier::Growth)
        .await
        .unwrap();

    let balance = billing.ledger.get_balance(user_id).await.unwrap();
    // 250 + min(300, 125) = 375
    assert_eq!(balance.credits, 375);
    assert_eq!(balance.batch_credits, 10);

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_get_balance_for_missing_user_is_zero() {
    let pool = setup_pool().await;
    let ledger = CreditLedger::new(pool);

    let balance = ledger.get_balance(Uuid::new_v4()).await.unwrap();
    assert_eq!(balance.credits, 0);
    assert_eq!(balance.bonus_credits, 0);
    assert_eq!(balance.batch_credits, 0);
}

// ============================================================================
// Webhook reconciliation
// ============================================================================

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_checkout_completed_grants_plan_allotment() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let user_id = create_test_profile(&pool, "free", 2, 0, false).await;

    billing
        .webhooks
        .apply_checkout_completed(user_id, SubscriptionTier::Pro, Some("sub_test_123"))
        .await
        .unwrap();

    let row: (String, String, Option<String>) = sqlx::query_as(
        "SELECT subscription_tier, subscription_status, stripe_subscription_id
         FROM profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.0, "pro");
    assert_eq!(row.1, "active");
    assert_eq!(row.2.as_deref(), Some("sub_test_123"));

    let balance = billing.ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.credits, 100);
    assert_eq!(balance.batch_credits, 5);

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_grant_logs_delta_so_ledger_replays() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    // free user holding 2 leftover credits checks out to pro (100/5)
    let user_id = create_test_profile(&pool, "free", 2, 0, false).await;

    billing
        .ledger
        .grant_plan_credits(user_id, SubscriptionTier::Pro)
        .await
        .unwrap();

    // The grant sets the balance absolutely but must log the delta:
    // replaying 2 + 98 lands on the stored balance of 100.
    let transactions = billing.ledger.recent_transactions(user_id, 10).await.unwrap();
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, 98);
    assert_eq!(transactions[0].balance_after, 100);

    let (batch_amount, batch_after): (i64, i64) = sqlx::query_as(
        "SELECT amount, balance_after FROM batch_credit_transactions
         WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(batch_amount, 5);
    assert_eq!(batch_after, 5);

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_batch_reset_logs_delta() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let user_id = create_test_profile(&pool, "growth", 100, 0, false).await;
    sqlx::query("UPDATE profiles SET batch_credits = 7 WHERE id = $1")
        .bind(user_id)
        .execute(&pool)
        .await
        .unwrap();

    billing
        .ledger
        .reset_batch_credits(user_id, SubscriptionTier::Growth)
        .await
        .unwrap();

    let balance = billing.ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.batch_credits, 10);

    // 7 + 3 = 10: the log row carries the delta, not the allotment
    let (batch_amount, batch_after): (i64, i64) = sqlx::query_as(
        "SELECT amount, balance_after FROM batch_credit_transactions
         WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(batch_amount, 3);
    assert_eq!(batch_after, 10);

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_subscription_update_syncs_status_without_tier_mapping() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let user_id = create_test_profile(&pool, "pro", 50, 0, false).await;

    // A price added in Stripe but absent from config resolves no tier; the
    // provider-reported status must still be applied.
    billing
        .webhooks
        .apply_subscription_updated(
            user_id,
            None,
            streamsuite_shared::SubscriptionStatus::PastDue,
            "sub_unmapped_price",
        )
        .await
        .unwrap();

    let (tier, status): (String, String) = sqlx::query_as(
        "SELECT subscription_tier, subscription_status FROM profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(tier, "pro");
    assert_eq!(status, "past_due");

    // With a resolved tier, both fields sync
    billing
        .webhooks
        .apply_subscription_updated(
            user_id,
            Some(SubscriptionTier::Growth),
            streamsuite_shared::SubscriptionStatus::Active,
            "sub_unmapped_price",
        )
        .await
        .unwrap();

    let (tier, status): (String, String) = sqlx::query_as(
        "SELECT subscription_tier, subscription_status FROM profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(tier, "growth");
    assert_eq!(status, "active");

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_subscription_deleted_downgrades_to_free() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let user_id = create_test_profile(&pool, "pro", 80, 15, false).await;
    sqlx::query(
        "UPDATE profiles SET batch_credits = 5, stripe_subscription_id = 'sub_x' WHERE id = $1",
    )
    .bind(user_id)
    .execute(&pool)
    .await
    .unwrap();

    billing
        .webhooks
        .apply_subscription_deleted(user_id)
        .await
        .unwrap();

    let row: (String, String, Option<String>) = sqlx::query_as(
        "SELECT subscription_tier, subscription_status, stripe_subscription_id
         FROM profiles WHERE id = $1",
    )
    .bind(user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(row.0, "free");
    assert_eq!(row.1, "canceled");
    assert_eq!(row.2, None);

    let balance = billing.ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.credits, 5);
    assert_eq!(balance.batch_credits, 0);
    // bonus credits survive cancellation
    assert_eq!(balance.bonus_credits, 15);

    cleanup_test_data(&pool, user_id).await;
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_webhook_event_claim_is_processed_once() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let event_id = format!("evt_test_{}", Uuid::new_v4());
    let now = OffsetDateTime::now_utc();

    // First claim wins
    assert!(billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    // Replay during processing loses
    assert!(!billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    // Replay after success also loses
    billing
        .webhooks
        .record_event_result(&event_id, "success", None)
        .await;
    assert!(!billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    sqlx::query("DELETE FROM stripe_webhook_events WHERE stripe_event_id = $1")
        .bind(&event_id)
        .execute(&pool)
        .await
        .ok();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_failed_event_can_be_reclaimed_on_retry() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let event_id = format!("evt_test_{}", Uuid::new_v4());
    let now = OffsetDateTime::now_utc();

    assert!(billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    // Processing fails, the caller returns 5xx, and Stripe redelivers: the
    // retry must win the claim or the mutation is lost forever.
    billing
        .webhooks
        .record_event_result(&event_id, "error", Some("transient database error"))
        .await;
    assert!(billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    // The re-claim resets the error state
    let (result, error): (String, Option<String>) = sqlx::query_as(
        "SELECT processing_result, error_message FROM stripe_webhook_events
         WHERE stripe_event_id = $1",
    )
    .bind(&event_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(result, "processing");
    assert_eq!(error, None);

    sqlx::query("DELETE FROM stripe_webhook_events WHERE stripe_event_id = $1")
        .bind(&event_id)
        .execute(&pool)
        .await
        .ok();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_stuck_processing_event_can_be_reclaimed() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let event_id = format!("evt_test_{}", Uuid::new_v4());
    let now = OffsetDateTime::now_utc();

    assert!(billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    // Simulate a handler that crashed 31 minutes ago without recording an
    // outcome
    sqlx::query(
        "UPDATE stripe_webhook_events
         SET processing_started_at = NOW() - INTERVAL '31 minutes'
         WHERE stripe_event_id = $1",
    )
    .bind(&event_id)
    .execute(&pool)
    .await
    .unwrap();

    assert!(billing
        .webhooks
        .claim_event(&event_id, "invoice.paid", now)
        .await
        .unwrap());

    sqlx::query("DELETE FROM stripe_webhook_events WHERE stripe_event_id = $1")
        .bind(&event_id)
        .execute(&pool)
        .await
        .ok();
}

#[tokio::test]
#[ignore = "requires DATABASE_URL"]
async fn test_payment_failed_marks_past_due_and_renewal_recovers() {
    let pool = setup_pool().await;
    let billing = setup_billing(pool.clone());
    let user_id = create_test_profile(&pool, "starter", 10, 0, false).await;

    billing.webhooks.apply_payment_failed(user_id).await.unwrap();
    let (status,): (String,) =
        sqlx::query_as("SELECT subscription_status FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "past_due");

    billing
        .webhooks
        .apply_renewal(user_id, SubscriptionTier::Starter)
        .await
        .unwrap();
    let (status,): (String,) =
        sqlx::query_as("SELECT subscription_status FROM profiles WHERE id = $1")
            .bind(user_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(status, "active");

    // 25 + min(10, 12) = 35
    let balance = billing.ledger.get_balance(user_id).await.unwrap();
    assert_eq!(balance.credits, 35);

    cleanup_test_data(&pool, user_id).await;
}
