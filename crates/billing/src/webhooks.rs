//! Stripe webhook reconciliation
//!
//! Stripe is the source of truth for subscription state; these handlers
//! reconcile the local profile and credit ledger to whatever the event says,
//! as absolute writes rather than increments. Events may arrive out of order
//! or more than once, so every event must first win the atomic processed-once
//! claim before any state changes.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use sqlx::PgPool;
use stripe::{Event, EventObject, EventType, Invoice, Subscription, Webhook};
use time::OffsetDateTime;
use uuid::Uuid;

use streamsuite_shared::{ActionStatus, SubscriptionStatus, SubscriptionTier};

use crate::audit::{AuditEntry, AuditLogger};
use crate::client::StripeClient;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};
use crate::ledger::CreditLedger;

type HmacSha256 = Hmac<Sha256>;

/// Signature timestamp tolerance in seconds
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Events stuck in "processing" longer than this are assumed crashed and
/// may be re-claimed
const PROCESSING_TIMEOUT_MINUTES: i32 = 30;

/// Webhook handler for Stripe events
pub struct WebhookHandler {
    stripe: StripeClient,
    pool: PgPool,
    ledger: CreditLedger,
    audit: AuditLogger,
}

impl WebhookHandler {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        let ledger = CreditLedger::new(pool.clone());
        let audit = AuditLogger::new(pool.clone());
        Self {
            stripe,
            pool,
            ledger,
            audit,
        }
    }

    /// Verify and parse a Stripe webhook event
    ///
    /// Uses manual signature verification as a fallback to work around
    /// async-stripe version incompatibility with newer Stripe API versions.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<Event> {
        let webhook_secret = &self.stripe.config().webhook_secret;

        match Webhook::construct_event(payload, signature, webhook_secret) {
            Ok(event) => return Ok(event),
            Err(e) => {
                tracing::warn!(
                    stripe_error = %e,
                    "Standard webhook parsing failed, trying manual verification"
                );
            }
        }

        // Parse the signature header: t=timestamp,v1=signature
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or(BillingError::WebhookSignatureInvalid)?;
        let v1_signature = v1_signature.ok_or(BillingError::WebhookSignatureInvalid)?;

        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_err(|_| BillingError::WebhookSignatureInvalid)?
            .as_secs() as i64;

        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                skew_secs = (now - timestamp).abs(),
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let secret_key = webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(webhook_secret);
        let signed_payload = format!("{}.{}", timestamp, payload);

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            return Err(BillingError::WebhookSignatureInvalid);
        }

        let event: Event = serde_json::from_str(payload).map_err(|e| {
            tracing::error!(parse_error = %e, "Failed to parse webhook event JSON");
            BillingError::WebhookSignatureInvalid
        })?;

        tracing::debug!(
            event_type = %event.type_,
            event_id = %event.id,
            "Manual webhook verification succeeded"
        );

        Ok(event)
    }

    /// Handle a verified Stripe event.
    ///
    /// The processed-once claim guarantees a given Stripe event ID produces
    /// at most one set of successful side effects. Duplicates and replays of
    /// a completed event return Ok without touching any state; replays of a
    /// failed event re-claim it so a provider retry can repair the mutation.
    pub async fn handle_event(&self, event: Event) -> BillingResult<()> {
        let event_id = event.id.to_string();
        let event_type_str = event.type_.to_string();

        let event_timestamp = OffsetDateTime::from_unix_timestamp(event.created)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());

        if !self
            .claim_event(&event_id, &event_type_str, event_timestamp)
            .await?
        {
            tracing::info!(
                event_id = %event_id,
                event_type = %event_type_str,
                "Duplicate webhook event, skipping"
            );
            return Ok(());
        }

        tracing::info!(
            event_type = %event.type_,
            event_id = %event.id,
            "Processing Stripe webhook event"
        );

        let result = self.process_event_internal(&event).await;

        match &result {
            Ok(()) => self.record_event_result(&event_id, "success", None).await,
            Err(e) => {
                self.record_event_result(&event_id, "error", Some(&e.to_string()))
                    .await;
                self.audit
                    .log_best_effort(AuditEntry::new("SYS-2000", "webhook", ActionStatus::Failure))
                    .await;
            }
        }

        result
    }

    /// Atomically claim an event ID for processing.
    ///
    /// The INSERT wins for the first arrival. The ON CONFLICT arm re-claims
    /// two kinds of rows: events whose processing ended in 'error' (the
    /// caller returned 5xx, so the provider retries and must be able to
    /// repair the mutation) and events stuck in 'processing' past the
    /// timeout (the handler crashed before recording an outcome). A
    /// successfully processed event can never be re-claimed.
    pub async fn claim_event(
        &self,
        event_id: &str,
        event_type: &str,
        event_timestamp: OffsetDateTime,
    ) -> BillingResult<bool> {
        let claimed: Option<(Uuid,)> = sqlx::query_as(
            r#"
            INSERT INTO stripe_webhook_events
                (stripe_event_id, event_type, event_timestamp, processing_result, processing_started_at)
            VALUES ($1, $2, $3, 'processing', NOW())
            ON CONFLICT (stripe_event_id) DO UPDATE SET
                processing_result = 'processing',
                processing_started_at = NOW(),
                error_message = NULL
            WHERE stripe_webhook_events.processing_result = 'error'
               OR (stripe_webhook_events.processing_result = 'processing'
                   AND stripe_webhook_events.processing_started_at
                       < NOW() - ($4 || ' minutes')::INTERVAL)
            RETURNING id
            "#,
        )
        .bind(event_id)
        .bind(event_type)
        .bind(event_timestamp)
        .bind(PROCESSING_TIMEOUT_MINUTES)
        .fetch_optional(&self.pool)
        .await?;

        Ok(claimed.is_some())
    }

    /// Record the outcome of a claimed event ('success' or 'error').
    pub async fn record_event_result(
        &self,
        event_id: &str,
        processing_result: &str,
        error_message: Option<&str>,
    ) {
        if let Err(e) = sqlx::query(
            "UPDATE stripe_webhook_events
             SET processing_result = $1, error_message = $2
             WHERE stripe_event_id = $3",
        )
        .bind(processing_result)
        .bind(error_message)
        .bind(event_id)
        .execute(&self.pool)
        .await
        {
            // The event would otherwise sit in 'processing' until the stuck
            // timeout and get re-claimed, so surface this loudly.
            tracing::error!(
                event_id = %event_id,
                processing_result = %processing_result,
                error = %e,
                "Failed to record webhook processing result"
            );
        }
    }

    async fn process_event_internal(&self, event: &Event) -> BillingResult<()> {
        let event_owned = event.clone();

        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                self.handle_checkout_completed(event_owned).await?;
            }
            EventType::CustomerSubscriptionUpdated => {
                self.handle_subscription_updated(event_owned).await?;
            }
            EventType::CustomerSubscriptionDeleted => {
                self.handle_subscription_deleted(event_owned).await?;
            }
            EventType::InvoicePaid => {
                self.handle_invoice_paid(event_owned).await?;
            }
            EventType::InvoicePaymentFailed => {
                self.handle_invoice_payment_failed(event_owned).await?;
            }
            _ => {
                tracing::info!(
                    event_type = %event.type_,
                    event_id = %event.id,
                    "Received unhandled Stripe event type - no handler configured"
                );
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: Event) -> BillingResult<()> {
        let session = match event.data.object {
            EventObject::CheckoutSession(session) => session,
            _ => {
                return Err(BillingError::WebhookEventNotSupported(
                    "Expected CheckoutSession".to_string(),
                ))
            }
        };

        let metadata = session.metadata.as_ref();

        let user_id = metadata
            .and_then(|m| m.get("user_id"))
            .and_then(|id| Uuid::parse_str(id).ok());

        let tier = metadata
            .and_then(|m| m.get("plan_id"))
            .and_then(|t| t.parse::<SubscriptionTier>().ok());

        // Sessions created outside our checkout flow have no attribution
        // metadata. Skipping is deliberate: failing would make Stripe retry
        // an event we can never process.
        let (user_id, tier) = match (user_id, tier) {
            (Some(user_id), Some(tier)) => (user_id, tier),
            _ => {
                tracing::warn!(
                    session_id = %session.id,
                    "Checkout session missing user_id/plan_id metadata, skipping"
                );
                return Ok(());
            }
        };

        let subscription_id = session.subscription.as_ref().map(|s| s.id().to_string());

        self.apply_checkout_completed(user_id, tier, subscription_id.as_deref())
            .await
    }

    /// Activate a subscription after a completed checkout: set the tier and
    /// subscription reference absolutely and grant the full plan allotment.
    /// The profile update and the grant share one transaction, so a failed
    /// grant never leaves an upgraded tier without its credits.
    pub async fn apply_checkout_completed(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
        subscription_id: Option<&str>,
    ) -> BillingResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE profiles
             SET subscription_tier = $2,
                 subscription_status = 'active',
                 stripe_subscription_id = $3,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(tier)
        .bind(subscription_id)
        .execute(&mut *tx)
        .await?;

        self.ledger
            .grant_plan_credits_in(&mut tx, user_id, tier)
            .await?;

        tx.commit().await?;

        self.audit
            .log_best_effort(
                AuditEntry::new("USR-1001", "webhook", ActionStatus::Success).user(user_id),
            )
            .await;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            "Checkout completed, subscription activated"
        );

        Ok(())
    }

    async fn handle_subscription_updated(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;
        let user_id = self.resolve_user(&subscription).await?;

        let tier = subscription
            .items
            .data
            .first()
            .and_then(|item| item.price.as_ref())
            .and_then(|price| self.stripe.config().tier_for_price_id(price.id.as_str()));

        if tier.is_none() {
            tracing::warn!(
                user_id = %user_id,
                subscription_id = %subscription.id,
                "Subscription price does not map to a known tier, syncing status only"
            );
        }

        let status = map_subscription_status(subscription.status);

        self.apply_subscription_updated(user_id, tier, status, subscription.id.as_str())
            .await
    }

    /// Sync the profile's status and subscription reference to what Stripe
    /// reports; the tier changes only when the event's price resolved to a
    /// known tier. No credit movement: grants and renewals are driven by
    /// checkout and invoice events.
    pub async fn apply_subscription_updated(
        &self,
        user_id: Uuid,
        tier: Option<SubscriptionTier>,
        status: SubscriptionStatus,
        subscription_id: &str,
    ) -> BillingResult<()> {
        sqlx::query(
            "UPDATE profiles
             SET subscription_tier = COALESCE($2, subscription_tier),
                 subscription_status = $3,
                 stripe_subscription_id = $4,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(tier)
        .bind(status)
        .bind(subscription_id)
        .execute(&self.pool)
        .await?;

        self.audit
            .log_best_effort(
                AuditEntry::new("USR-1002", "webhook", ActionStatus::Success).user(user_id),
            )
            .await;

        tracing::info!(
            user_id = %user_id,
            tier = ?tier,
            status = %status,
            "Subscription updated"
        );

        Ok(())
    }

    async fn handle_subscription_deleted(&self, event: Event) -> BillingResult<()> {
        let subscription = self.extract_subscription(event)?;
        let user_id = self.resolve_user(&subscription).await?;

        self.apply_subscription_deleted(user_id).await
    }

    /// Downgrade to the free plan on cancellation: free tier, canceled
    /// status, subscription reference cleared, credits reset to the free
    /// allotment, batch credits zeroed. Bonus credits are promotional and
    /// survive cancellation.
    pub async fn apply_subscription_deleted(&self, user_id: Uuid) -> BillingResult<()> {
        let free = crate::plans::get_plan(SubscriptionTier::Free);

        sqlx::query(
            "UPDATE profiles
             SET subscription_tier = 'free',
                 subscription_status = 'canceled',
                 stripe_subscription_id = NULL,
                 credits = $2,
                 batch_credits = 0,
                 updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(free.monthly_credits)
        .execute(&self.pool)
        .await?;

        self.audit
            .log_best_effort(
                AuditEntry::new("USR-1003", "webhook", ActionStatus::Success).user(user_id),
            )
            .await;

        tracing::info!(
            user_id = %user_id,
            "Subscription canceled, downgraded to free tier"
        );

        Ok(())
    }

    async fn handle_invoice_paid(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;

        // The first invoice of a subscription fires alongside
        // checkout.session.completed, which already granted the plan
        // allotment. Treating it as a renewal would stack a rollover on top
        // of the initial grant.
        if matches!(
            invoice.billing_reason,
            Some(stripe::InvoiceBillingReason::SubscriptionCreate)
        ) {
            tracing::info!(
                invoice_id = %invoice.id,
                "Skipping subscription_create invoice, handled by checkout"
            );
            return Ok(());
        }

        let user_id = self.user_id_from_invoice(&invoice).await?;

        // Renew against the profile's current tier rather than re-deriving it
        // from the invoice lines; subscription.updated keeps the tier synced.
        let tier = self.current_tier(user_id).await?;

        self.apply_renewal(user_id, tier).await
    }

    /// Apply a billing cycle renewal: regular credits refill with capped
    /// rollover, batch credits reset absolutely, and a past-due account
    /// returns to active.
    pub async fn apply_renewal(
        &self,
        user_id: Uuid,
        tier: SubscriptionTier,
    ) -> BillingResult<()> {
        self.ledger.renew_regular_credits(user_id, tier).await?;
        self.ledger.reset_batch_credits(user_id, tier).await?;

        sqlx::query(
            "UPDATE profiles
             SET subscription_status = 'active', updated_at = NOW()
             WHERE id = $1 AND subscription_status = 'past_due'",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.audit
            .log_best_effort(
                AuditEntry::new("CRD-1002", "webhook", ActionStatus::Success).user(user_id),
            )
            .await;

        tracing::info!(
            user_id = %user_id,
            tier = %tier,
            "Billing cycle renewal applied"
        );

        Ok(())
    }

    async fn handle_invoice_payment_failed(&self, event: Event) -> BillingResult<()> {
        let invoice = self.extract_invoice(event)?;
        let user_id = self.user_id_from_invoice(&invoice).await?;

        self.apply_payment_failed(user_id).await
    }

    /// Mark the account past due. Credits are left untouched: access
    /// restrictions for past-due accounts are enforced at the feature gates,
    /// not by confiscating the balance.
    pub async fn apply_payment_failed(&self, user_id: Uuid) -> BillingResult<()> {
        sqlx::query(
            "UPDATE profiles
             SET subscription_status = 'past_due', updated_at = NOW()
             WHERE id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        self.audit
            .log_best_effort(
                AuditEntry::new("USR-2001", "webhook", ActionStatus::Warning).user(user_id),
            )
            .await;

        tracing::warn!(user_id = %user_id, "Invoice payment failed, account past due");

        Ok(())
    }

    fn extract_subscription(&self, event: Event) -> BillingResult<Subscription> {
        match event.data.object {
            EventObject::Subscription(subscription) => Ok(subscription),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Subscription".to_string(),
            )),
        }
    }

    fn extract_invoice(&self, event: Event) -> BillingResult<Invoice> {
        match event.data.object {
            EventObject::Invoice(invoice) => Ok(invoice),
            _ => Err(BillingError::WebhookEventNotSupported(
                "Expected Invoice".to_string(),
            )),
        }
    }

    /// Resolve the user a subscription belongs to: checkout metadata when
    /// present, otherwise the stored customer mapping.
    async fn resolve_user(&self, subscription: &Subscription) -> BillingResult<Uuid> {
        if let Some(user_id) = subscription
            .metadata
            .get("user_id")
            .and_then(|id| Uuid::parse_str(id).ok())
        {
            return Ok(user_id);
        }

        let customer_id = subscription.customer.id().to_string();
        let customers = CustomerService::new(self.stripe.clone(), self.pool.clone());
        customers.user_id_for_customer(&customer_id).await
    }

    async fn user_id_from_invoice(&self, invoice: &Invoice) -> BillingResult<Uuid> {
        let customer_id = match &invoice.customer {
            Some(stripe::Expandable::Id(id)) => id.to_string(),
            Some(stripe::Expandable::Object(c)) => c.id.to_string(),
            None => {
                return Err(BillingError::Internal(
                    "No customer on invoice".to_string(),
                ))
            }
        };

        let customers = CustomerService::new(self.stripe.clone(), self.pool.clone());
        customers.user_id_for_customer(&customer_id).await
    }

    async fn current_tier(&self, user_id: Uuid) -> BillingResult<SubscriptionTier> {
        let row: Option<(SubscriptionTier,)> =
            sqlx::query_as("SELECT subscription_tier FROM profiles WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(tier,)| tier)
            .ok_or_else(|| BillingError::NotFound(format!("profile {}", user_id)))
    }
}

/// Map a Stripe subscription status to the local three-state model
fn map_subscription_status(status: stripe::SubscriptionStatus) -> SubscriptionStatus {
    use stripe::SubscriptionStatus as Stripe;
    match status {
        Stripe::Active | Stripe::Trialing => SubscriptionStatus::Active,
        Stripe::PastDue | Stripe::Unpaid => SubscriptionStatus::PastDue,
        Stripe::Canceled | Stripe::IncompleteExpired => SubscriptionStatus::Canceled,
        // Incomplete subscriptions have not finished their first payment;
        // keep the account usable until Stripe settles the state.
        Stripe::Incomplete | Stripe::Paused => SubscriptionStatus::Active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Trialing),
            SubscriptionStatus::Active
        );
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::Unpaid),
            SubscriptionStatus::PastDue
        );
        assert_eq!(
            map_subscription_status(stripe::SubscriptionStatus::IncompleteExpired),
            SubscriptionStatus::Canceled
        );
    }
}
