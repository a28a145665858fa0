//! Stripe Checkout sessions

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CustomerId,
};
use uuid::Uuid;

use streamsuite_shared::SubscriptionTier;

use crate::client::StripeClient;
use crate::customer::CustomerService;
use crate::error::{BillingError, BillingResult};

/// Billing interval for subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BillingInterval {
    #[default]
    Monthly,
    Yearly,
}

impl BillingInterval {
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "monthly" | "month" => Some(Self::Monthly),
            "yearly" | "annual" | "year" => Some(Self::Yearly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
        }
    }
}

impl std::fmt::Display for BillingInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Options for a checkout session; URLs fall back to the configured app base URL
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CheckoutOptions {
    pub success_url: Option<String>,
    pub cancel_url: Option<String>,
}

/// Checkout service for creating Stripe checkout sessions
pub struct CheckoutService {
    stripe: StripeClient,
    pool: PgPool,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, pool: PgPool) -> Self {
        Self { stripe, pool }
    }

    /// Create a checkout session for a new subscription
    ///
    /// The free tier is not a checkout target and is rejected before any
    /// Stripe call. The user's Stripe customer is created on first checkout
    /// and reused afterwards, so retries never mint duplicate customers.
    pub async fn create_subscription_checkout(
        &self,
        user_id: Uuid,
        email: &str,
        tier: SubscriptionTier,
        billing_interval: BillingInterval,
        options: CheckoutOptions,
    ) -> BillingResult<CheckoutSession> {
        if !tier.is_paid() {
            return Err(BillingError::InvalidTier(
                "free tier cannot be purchased".to_string(),
            ));
        }

        let price_id = self
            .stripe
            .config()
            .price_id_for(tier, billing_interval)
            .ok_or_else(|| {
                BillingError::Config(format!(
                    "no {} price configured for tier {}",
                    billing_interval, tier
                ))
            })?
            .to_string();

        let customers = CustomerService::new(self.stripe.clone(), self.pool.clone());
        let customer = customers.get_or_create_customer(user_id, email).await?;

        let customer_id = customer
            .id
            .as_str()
            .parse::<CustomerId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid customer ID: {}", e)))?;

        let base_url = &self.stripe.config().app_base_url;
        let success_url = options.success_url.unwrap_or_else(|| {
            format!(
                "{}/billing/success?session_id={{CHECKOUT_SESSION_ID}}",
                base_url
            )
        });
        let cancel_url = options
            .cancel_url
            .unwrap_or_else(|| format!("{}/billing/cancel", base_url));

        // Metadata drives webhook reconciliation; a session without these keys
        // cannot be attributed to a user when checkout.session.completed arrives.
        let mut metadata = std::collections::HashMap::new();
        metadata.insert("user_id".to_string(), user_id.to_string());
        metadata.insert("plan_id".to_string(), tier.to_string());
        metadata.insert(
            "billing_interval".to_string(),
            billing_interval.as_str().to_string(),
        );

        let line_items = vec![CreateCheckoutSessionLineItems {
            price: Some(price_id),
            quantity: Some(1),
            ..Default::default()
        }];

        let params = CreateCheckoutSession {
            customer: Some(customer_id),
            mode: Some(CheckoutSessionMode::Subscription),
            line_items: Some(line_items),
            success_url: Some(&success_url),
            cancel_url: Some(&cancel_url),
            metadata: Some(metadata),
            allow_promotion_codes: Some(true),
            billing_address_collection: Some(stripe::CheckoutSessionBillingAddressCollection::Auto),
            ..Default::default()
        };

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        tracing::info!(
            user_id = %user_id,
            session_id = %session.id,
            tier = %tier,
            billing_interval = %billing_interval,
            "Created checkout session"
        );

        Ok(session)
    }

    /// Retrieve a checkout session by ID
    pub async fn get_session(&self, session_id: &str) -> BillingResult<CheckoutSession> {
        let session_id = session_id
            .parse::<stripe::CheckoutSessionId>()
            .map_err(|e| BillingError::StripeApi(format!("Invalid session ID: {}", e)))?;

        let session = CheckoutSession::retrieve(self.stripe.inner(), &session_id, &[]).await?;
        Ok(session)
    }
}

/// Response for creating a checkout session
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
}

impl From<CheckoutSession> for CheckoutResponse {
    fn from(session: CheckoutSession) -> Self {
        Self {
            session_id: session.id.to_string(),
            url: session.url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_parsing_is_lenient() {
        assert_eq!(
            BillingInterval::from_str("monthly"),
            Some(BillingInterval::Monthly)
        );
        assert_eq!(
            BillingInterval::from_str("Month"),
            Some(BillingInterval::Monthly)
        );
        assert_eq!(
            BillingInterval::from_str("annual"),
            Some(BillingInterval::Yearly)
        );
        assert_eq!(
            BillingInterval::from_str("YEARLY"),
            Some(BillingInterval::Yearly)
        );
        assert_eq!(BillingInterval::from_str("weekly"), None);
    }

    #[test]
    fn test_interval_display() {
        assert_eq!(BillingInterval::Monthly.to_string(), "monthly");
        assert_eq!(BillingInterval::Yearly.to_string(), "yearly");
    }
}
