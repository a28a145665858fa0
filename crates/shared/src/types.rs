//! Common types used across StreamSuite

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// ID Wrappers
// =============================================================================

/// User ID wrapper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for UserId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Subscription tier for billing
/// Tier hierarchy: Free → Starter ($19) → Pro ($49) → Growth ($99) → Agency ($249)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionTier {
    Free,
    Starter,
    Pro,
    Growth,
    Agency,
}

impl Default for SubscriptionTier {
    fn default() -> Self {
        Self::Free
    }
}

impl SubscriptionTier {
    /// All tiers in ascending price order
    pub const ASCENDING: [SubscriptionTier; 5] = [
        Self::Free,
        Self::Starter,
        Self::Pro,
        Self::Growth,
        Self::Agency,
    ];

    /// Whether this tier is purchasable (free is not a checkout target)
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Starter => write!(f, "starter"),
            Self::Pro => write!(f, "pro"),
            Self::Growth => write!(f, "growth"),
            Self::Agency => write!(f, "agency"),
        }
    }
}

impl std::str::FromStr for SubscriptionTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "starter" => Ok(Self::Starter),
            "pro" => Ok(Self::Pro),
            "growth" => Ok(Self::Growth),
            "agency" => Ok(Self::Agency),
            _ => Err(format!("Invalid subscription tier: {}", s)),
        }
    }
}

/// Subscription status mirrored from the billing provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::PastDue => write!(f, "past_due"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" | "trialing" => Ok(Self::Active),
            "past_due" | "unpaid" => Ok(Self::PastDue),
            "canceled" | "cancelled" | "incomplete_expired" => Ok(Self::Canceled),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

/// Credit pool a transaction was drawn from or added to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CreditType {
    Regular,
    Bonus,
}

impl std::fmt::Display for CreditType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Bonus => write!(f, "bonus"),
        }
    }
}

/// Operation type recorded on every ledger transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CreditOperation {
    Generation,
    SubscriptionGrant,
    AdminAdjustment,
    Rollover,
}

impl std::fmt::Display for CreditOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Generation => write!(f, "generation"),
            Self::SubscriptionGrant => write!(f, "subscription_grant"),
            Self::AdminAdjustment => write!(f, "admin_adjustment"),
            Self::Rollover => write!(f, "rollover"),
        }
    }
}

/// Outcome of an audited action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Success,
    Failure,
    Blocked,
    Warning,
}

impl std::fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
            Self::Blocked => write!(f, "blocked"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_tier_roundtrip() {
        for tier in SubscriptionTier::ASCENDING {
            let parsed = SubscriptionTier::from_str(&tier.to_string()).unwrap();
            assert_eq!(parsed, tier);
        }
    }

    #[test]
    fn test_unknown_tier_rejected() {
        assert!(SubscriptionTier::from_str("enterprise").is_err());
        assert!(SubscriptionTier::from_str("").is_err());
    }

    #[test]
    fn test_status_maps_provider_aliases() {
        assert_eq!(
            SubscriptionStatus::from_str("trialing").unwrap(),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_str("unpaid").unwrap(),
            SubscriptionStatus::PastDue
        );
    }

    #[test]
    fn test_paid_tiers() {
        assert!(!SubscriptionTier::Free.is_paid());
        assert!(SubscriptionTier::Starter.is_paid());
        assert!(SubscriptionTier::Agency.is_paid());
    }
}
