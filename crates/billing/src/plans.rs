//! Plan Catalog
//!
//! Single source of truth for tier economics and feature gating.
//! All functions here are pure lookups over static data and never fail:
//! an unknown tier resolves to the free plan.

use serde::{Deserialize, Serialize};
use streamsuite_shared::SubscriptionTier;

/// Features gated by subscription tier
///
/// A closed enum (rather than a string set) so a typo in a gate check is a
/// compile error, not a silently-false membership test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    WorkflowGeneration,
    WorkflowConversion,
    WorkflowDebugging,
    BatchGeneration,
    ClientManagement,
    WhiteLabel,
    PrioritySupport,
}

/// Static definition of a subscription plan
#[derive(Debug, Clone, Serialize)]
pub struct PlanDefinition {
    pub tier: SubscriptionTier,
    pub display_name: &'static str,
    pub monthly_price_cents: i64,
    pub yearly_price_cents: i64,
    /// Regular credits granted each billing cycle
    pub monthly_credits: i64,
    /// Cap on credits carried into the next cycle (half the monthly allotment)
    pub max_rollover: i64,
    /// Batch credits granted each billing cycle (never roll over)
    pub monthly_batch_credits: i64,
    pub max_workflows_per_batch: i64,
    #[serde(skip)]
    pub features: &'static [Feature],
}

const FREE: PlanDefinition = PlanDefinition {
    tier: SubscriptionTier::Free,
    display_name: "Free",
    monthly_price_cents: 0,
    yearly_price_cents: 0,
    monthly_credits: 5,
    max_rollover: 2,
    monthly_batch_credits: 0,
    max_workflows_per_batch: 0,
    features: &[Feature::WorkflowGeneration],
};

const STARTER: PlanDefinition = PlanDefinition {
    tier: SubscriptionTier::Starter,
    display_name: "Starter",
    monthly_price_cents: 1_900,
    yearly_price_cents: 19_000,
    monthly_credits: 25,
    max_rollover: 12,
    monthly_batch_credits: 0,
    max_workflows_per_batch: 0,
    features: &[Feature::WorkflowGeneration, Feature::WorkflowDebugging],
};

const PRO: PlanDefinition = PlanDefinition {
    tier: SubscriptionTier::Pro,
    display_name: "Pro",
    monthly_price_cents: 4_900,
    yearly_price_cents: 49_000,
    monthly_credits: 100,
    max_rollover: 50,
    monthly_batch_credits: 5,
    max_workflows_per_batch: 5,
    features: &[
        Feature::WorkflowGeneration,
        Feature::WorkflowConversion,
        Feature::WorkflowDebugging,
        Feature::BatchGeneration,
    ],
};

const GROWTH: PlanDefinition = PlanDefinition {
    tier: SubscriptionTier::Growth,
    display_name: "Growth",
    monthly_price_cents: 9_900,
    yearly_price_cents: 99_000,
    monthly_credits: 250,
    max_rollover: 125,
    monthly_batch_credits: 10,
    max_workflows_per_batch: 10,
    features: &[
        Feature::WorkflowGeneration,
        Feature::WorkflowConversion,
        Feature::WorkflowDebugging,
        Feature::BatchGeneration,
        Feature::PrioritySupport,
    ],
};

const AGENCY: PlanDefinition = PlanDefinition {
    tier: SubscriptionTier::Agency,
    display_name: "Agency",
    monthly_price_cents: 24_900,
    yearly_price_cents: 249_000,
    monthly_credits: 600,
    max_rollover: 300,
    monthly_batch_credits: 25,
    max_workflows_per_batch: 20,
    features: &[
        Feature::WorkflowGeneration,
        Feature::WorkflowConversion,
        Feature::WorkflowDebugging,
        Feature::BatchGeneration,
        Feature::ClientManagement,
        Feature::WhiteLabel,
        Feature::PrioritySupport,
    ],
};

/// Get the plan for a tier
pub fn get_plan(tier: SubscriptionTier) -> &'static PlanDefinition {
    match tier {
        SubscriptionTier::Free => &FREE,
        SubscriptionTier::Starter => &STARTER,
        SubscriptionTier::Pro => &PRO,
        SubscriptionTier::Growth => &GROWTH,
        SubscriptionTier::Agency => &AGENCY,
    }
}

/// Resolve a tier name to its plan, falling back to free for unknown input
pub fn get_plan_by_name(tier: &str) -> &'static PlanDefinition {
    let tier = tier
        .parse::<SubscriptionTier>()
        .unwrap_or(SubscriptionTier::Free);
    get_plan(tier)
}

/// Whether a tier grants access to a feature
pub fn can_access_feature(tier: SubscriptionTier, feature: Feature) -> bool {
    get_plan(tier).features.contains(&feature)
}

/// The cheapest plan that grants a feature, scanning tiers in ascending order.
///
/// If no plan grants the feature this returns the starter plan as a
/// conservative default for upsell prompts; callers must not treat the
/// result as proof the feature exists on that plan.
pub fn minimum_plan_for_feature(feature: Feature) -> &'static PlanDefinition {
    SubscriptionTier::ASCENDING
        .iter()
        .map(|tier| get_plan(*tier))
        .find(|plan| plan.features.contains(&feature))
        .unwrap_or(&STARTER)
}

/// Regular credits granted each cycle for a tier
pub fn monthly_credits(tier: SubscriptionTier) -> i64 {
    get_plan(tier).monthly_credits
}

/// Maximum credits carried into the next cycle for a tier
pub fn max_rollover(tier: SubscriptionTier) -> i64 {
    get_plan(tier).max_rollover
}

/// Batch credits granted each cycle for a tier
pub fn monthly_batch_credits(tier: SubscriptionTier) -> i64 {
    get_plan(tier).monthly_batch_credits
}

/// Maximum workflows per batch generation for a tier
pub fn max_workflows_per_batch(tier: SubscriptionTier) -> i64 {
    get_plan(tier).max_workflows_per_batch
}
