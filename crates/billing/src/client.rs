//! Stripe client configuration

use streamsuite_shared::SubscriptionTier;
use stripe::Client;

use crate::checkout::BillingInterval;
use crate::error::{BillingError, BillingResult};

/// Configuration for Stripe billing
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Stripe secret API key
    pub secret_key: String,
    /// Stripe webhook signing secret
    pub webhook_secret: String,
    /// Price IDs for each subscription tier
    pub price_ids: PriceIds,
    /// Base URL for success/cancel redirects
    pub app_base_url: String,
}

/// Stripe price IDs for the paid subscription tiers
/// Tier hierarchy: Free (no price) → Starter ($19) → Pro ($49) → Growth ($99) → Agency ($249)
#[derive(Debug, Clone)]
pub struct PriceIds {
    // Monthly subscription prices (required)
    pub starter: String,
    pub pro: String,
    pub growth: String,
    pub agency: String,

    // Yearly subscription prices (optional; two months free)
    pub starter_yearly: Option<String>,
    pub pro_yearly: Option<String>,
    pub growth_yearly: Option<String>,
    pub agency_yearly: Option<String>,
}

impl StripeConfig {
    /// Create config from environment variables
    pub fn from_env() -> BillingResult<Self> {
        Ok(Self {
            secret_key: std::env::var("STRIPE_SECRET_KEY")
                .map_err(|_| BillingError::Config("STRIPE_SECRET_KEY not set".to_string()))?,
            webhook_secret: std::env::var("STRIPE_WEBHOOK_SECRET")
                .map_err(|_| BillingError::Config("STRIPE_WEBHOOK_SECRET not set".to_string()))?,
            price_ids: PriceIds {
                starter: std::env::var("STRIPE_PRICE_STARTER").map_err(|_| {
                    BillingError::Config("STRIPE_PRICE_STARTER not set".to_string())
                })?,
                pro: std::env::var("STRIPE_PRICE_PRO")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_PRO not set".to_string()))?,
                growth: std::env::var("STRIPE_PRICE_GROWTH")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_GROWTH not set".to_string()))?,
                agency: std::env::var("STRIPE_PRICE_AGENCY")
                    .map_err(|_| BillingError::Config("STRIPE_PRICE_AGENCY not set".to_string()))?,

                starter_yearly: std::env::var("STRIPE_PRICE_STARTER_YEARLY").ok(),
                pro_yearly: std::env::var("STRIPE_PRICE_PRO_YEARLY").ok(),
                growth_yearly: std::env::var("STRIPE_PRICE_GROWTH_YEARLY").ok(),
                agency_yearly: std::env::var("STRIPE_PRICE_AGENCY_YEARLY").ok(),
            },
            app_base_url: std::env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        })
    }

    /// Get the price ID for a (tier, interval) pair
    /// Returns None for the free tier or an unconfigured yearly price
    pub fn price_id_for(&self, tier: SubscriptionTier, interval: BillingInterval) -> Option<&str> {
        match interval {
            BillingInterval::Monthly => match tier {
                SubscriptionTier::Free => None,
                SubscriptionTier::Starter => Some(&self.price_ids.starter),
                SubscriptionTier::Pro => Some(&self.price_ids.pro),
                SubscriptionTier::Growth => Some(&self.price_ids.growth),
                SubscriptionTier::Agency => Some(&self.price_ids.agency),
            },
            BillingInterval::Yearly => match tier {
                SubscriptionTier::Free => None,
                SubscriptionTier::Starter => self.price_ids.starter_yearly.as_deref(),
                SubscriptionTier::Pro => self.price_ids.pro_yearly.as_deref(),
                SubscriptionTier::Growth => self.price_ids.growth_yearly.as_deref(),
                SubscriptionTier::Agency => self.price_ids.agency_yearly.as_deref(),
            },
        }
    }

    /// Get the tier for a price ID (handles both monthly and yearly prices)
    pub fn tier_for_price_id(&self, price_id: &str) -> Option<SubscriptionTier> {
        if price_id == self.price_ids.starter
            || self.price_ids.starter_yearly.as_deref() == Some(price_id)
        {
            Some(SubscriptionTier::Starter)
        } else if price_id == self.price_ids.pro
            || self.price_ids.pro_yearly.as_deref() == Some(price_id)
        {
            Some(SubscriptionTier::Pro)
        } else if price_id == self.price_ids.growth
            || self.price_ids.growth_yearly.as_deref() == Some(price_id)
        {
            Some(SubscriptionTier::Growth)
        } else if price_id == self.price_ids.agency
            || self.price_ids.agency_yearly.as_deref() == Some(price_id)
        {
            Some(SubscriptionTier::Agency)
        } else {
            None
        }
    }
}

/// Stripe billing client
#[derive(Clone)]
pub struct StripeClient {
    client: Client,
    config: StripeConfig,
}

impl StripeClient {
    /// Create a new Stripe client from config
    pub fn new(config: StripeConfig) -> Self {
        let client = Client::new(&config.secret_key);
        Self { client, config }
    }

    /// Create a new Stripe client from environment variables
    pub fn from_env() -> BillingResult<Self> {
        let config = StripeConfig::from_env()?;
        Ok(Self::new(config))
    }

    /// Get the inner Stripe client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get the config
    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> StripeConfig {
        StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: "whsec_test".to_string(),
            price_ids: PriceIds {
                starter: "price_starter_m".to_string(),
                pro: "price_pro_m".to_string(),
                growth: "price_growth_m".to_string(),
                agency: "price_agency_m".to_string(),
                starter_yearly: Some("price_starter_y".to_string()),
                pro_yearly: None,
                growth_yearly: None,
                agency_yearly: None,
            },
            app_base_url: "http://localhost:3000".to_string(),
        }
    }

    #[test]
    fn test_free_tier_has_no_price() {
        let config = test_config();
        assert!(config
            .price_id_for(SubscriptionTier::Free, BillingInterval::Monthly)
            .is_none());
    }

    #[test]
    fn test_unconfigured_yearly_price() {
        let config = test_config();
        assert!(config
            .price_id_for(SubscriptionTier::Pro, BillingInterval::Yearly)
            .is_none());
        assert_eq!(
            config.price_id_for(SubscriptionTier::Starter, BillingInterval::Yearly),
            Some("price_starter_y")
        );
    }

    #[test]
    fn test_tier_for_price_id() {
        let config = test_config();
        assert_eq!(
            config.tier_for_price_id("price_growth_m"),
            Some(SubscriptionTier::Growth)
        );
        assert_eq!(
            config.tier_for_price_id("price_starter_y"),
            Some(SubscriptionTier::Starter)
        );
        assert_eq!(config.tier_for_price_id("price_unknown"), None);
    }
}
