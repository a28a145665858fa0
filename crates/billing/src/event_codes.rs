//! Structured event code catalog
//!
//! Every audited action carries a PREFIX-NNNN code. The prefix names the
//! subsystem, the number band names the outcome:
//!
//! - 1000s: successful operations
//! - 2000s: errors and warnings
//! - 3000s: security events and blocked actions
//!
//! Codes are stable identifiers for dashboards and alerting; never renumber
//! an existing code.

use streamsuite_shared::ActionStatus;

/// Event code prefixes, one per subsystem
pub mod prefix {
    /// Workflow generation
    pub const GENERATION: &str = "GEN";

    /// Workflow conversion between platforms
    pub const CONVERSION: &str = "CVT";

    /// Workflow debugging
    pub const DEBUGGING: &str = "DBG";

    /// Credit ledger operations
    pub const CREDITS: &str = "CRD";

    /// Security events (signature failures, auth failures, gate blocks)
    pub const SECURITY: &str = "SEC";

    /// n8n export and import
    pub const N8N: &str = "N8N";

    /// System-level events (webhooks, background processing)
    pub const SYSTEM: &str = "SYS";

    /// User account and subscription lifecycle
    pub const USER: &str = "USR";
}

/// Severity attached to a code for alert routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Catalog entry for a single event code
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct EventCodeInfo {
    pub code: &'static str,
    pub category: &'static str,
    pub severity: Severity,
    pub description: &'static str,
    /// Operator-facing hint for 2000/3000-band codes
    pub remediation: Option<&'static str>,
}

/// The full event code catalog
pub const CATALOG: &[EventCodeInfo] = &[
    // Generation
    EventCodeInfo {
        code: "GEN-1000",
        category: "generation",
        severity: Severity::Info,
        description: "Workflow generated successfully",
        remediation: None,
    },
    EventCodeInfo {
        code: "GEN-2000",
        category: "generation",
        severity: Severity::Warning,
        description: "Workflow generation failed",
        remediation: Some("Check generation service logs for the underlying error"),
    },
    EventCodeInfo {
        code: "GEN-2001",
        category: "generation",
        severity: Severity::Warning,
        description: "Generation rejected: insufficient credits",
        remediation: Some("User must purchase credits or wait for cycle renewal"),
    },
    EventCodeInfo {
        code: "GEN-3000",
        category: "generation",
        severity: Severity::Warning,
        description: "Generation blocked by plan feature gate",
        remediation: Some("Feature requires a higher subscription tier"),
    },
    // Conversion
    EventCodeInfo {
        code: "CVT-1000",
        category: "conversion",
        severity: Severity::Info,
        description: "Workflow converted successfully",
        remediation: None,
    },
    EventCodeInfo {
        code: "CVT-2000",
        category: "conversion",
        severity: Severity::Warning,
        description: "Workflow conversion failed",
        remediation: Some("Check source workflow for unsupported nodes"),
    },
    // Debugging
    EventCodeInfo {
        code: "DBG-1000",
        category: "debugging",
        severity: Severity::Info,
        description: "Workflow debug session completed",
        remediation: None,
    },
    EventCodeInfo {
        code: "DBG-2000",
        category: "debugging",
        severity: Severity::Warning,
        description: "Workflow debug session failed",
        remediation: None,
    },
    // Credits
    EventCodeInfo {
        code: "CRD-1000",
        category: "credits",
        severity: Severity::Info,
        description: "Credits granted",
        remediation: None,
    },
    EventCodeInfo {
        code: "CRD-1001",
        category: "credits",
        severity: Severity::Info,
        description: "Credits deducted",
        remediation: None,
    },
    EventCodeInfo {
        code: "CRD-1002",
        category: "credits",
        severity: Severity::Info,
        description: "Billing cycle renewal applied",
        remediation: None,
    },
    EventCodeInfo {
        code: "CRD-2000",
        category: "credits",
        severity: Severity::Critical,
        description: "Credit ledger operation failed",
        remediation: Some("Ledger and balance may need manual reconciliation"),
    },
    // N8N
    EventCodeInfo {
        code: "N8N-1000",
        category: "n8n",
        severity: Severity::Info,
        description: "Workflow exported to n8n",
        remediation: None,
    },
    EventCodeInfo {
        code: "N8N-2000",
        category: "n8n",
        severity: Severity::Warning,
        description: "n8n export failed",
        remediation: Some("Verify the n8n instance is reachable and credentials are valid"),
    },
    // Security
    EventCodeInfo {
        code: "SEC-3000",
        category: "security",
        severity: Severity::Critical,
        description: "Webhook signature verification failed",
        remediation: Some("Confirm the webhook signing secret matches the Stripe dashboard"),
    },
    EventCodeInfo {
        code: "SEC-3001",
        category: "security",
        severity: Severity::Warning,
        description: "Authentication failed",
        remediation: None,
    },
    EventCodeInfo {
        code: "SEC-3002",
        category: "security",
        severity: Severity::Warning,
        description: "Request blocked by access policy",
        remediation: None,
    },
    // System
    EventCodeInfo {
        code: "SYS-1000",
        category: "system",
        severity: Severity::Info,
        description: "Webhook event processed",
        remediation: None,
    },
    EventCodeInfo {
        code: "SYS-2000",
        category: "system",
        severity: Severity::Critical,
        description: "Webhook event processing failed",
        remediation: Some("Event is retried by Stripe; investigate if failures persist"),
    },
    // User / subscription lifecycle
    EventCodeInfo {
        code: "USR-1000",
        category: "subscription",
        severity: Severity::Info,
        description: "Checkout session created",
        remediation: None,
    },
    EventCodeInfo {
        code: "USR-1001",
        category: "subscription",
        severity: Severity::Info,
        description: "Subscription activated",
        remediation: None,
    },
    EventCodeInfo {
        code: "USR-1002",
        category: "subscription",
        severity: Severity::Info,
        description: "Subscription updated",
        remediation: None,
    },
    EventCodeInfo {
        code: "USR-1003",
        category: "subscription",
        severity: Severity::Info,
        description: "Subscription canceled, downgraded to free",
        remediation: None,
    },
    EventCodeInfo {
        code: "USR-2000",
        category: "subscription",
        severity: Severity::Warning,
        description: "Checkout session creation failed",
        remediation: Some("Check Stripe API status and price configuration"),
    },
    EventCodeInfo {
        code: "USR-2001",
        category: "subscription",
        severity: Severity::Critical,
        description: "Subscription payment failed",
        remediation: Some("Stripe retries automatically; account is marked past due"),
    },
];

/// Look up a code's catalog entry
pub fn lookup(code: &str) -> Option<&'static EventCodeInfo> {
    CATALOG.iter().find(|info| info.code == code)
}

/// All codes in a category
pub fn by_category(category: &str) -> Vec<&'static EventCodeInfo> {
    CATALOG
        .iter()
        .filter(|info| info.category == category)
        .collect()
}

/// All codes at a severity
pub fn by_severity(severity: Severity) -> Vec<&'static EventCodeInfo> {
    CATALOG
        .iter()
        .filter(|info| info.severity == severity)
        .collect()
}

/// Case-insensitive search over code, description, and remediation text
pub fn search(query: &str) -> Vec<&'static EventCodeInfo> {
    let query = query.to_lowercase();
    CATALOG
        .iter()
        .filter(|info| {
            info.code.to_lowercase().contains(&query)
                || info.description.to_lowercase().contains(&query)
                || info
                    .remediation
                    .is_some_and(|r| r.to_lowercase().contains(&query))
        })
        .collect()
}

/// Derive the event code for an action outcome.
///
/// `action_type` is the subsystem name as recorded on audit rows
/// ("generation", "credits", ...); unknown actions map to the SYS prefix.
pub fn generate_event_id(action_type: &str, status: ActionStatus) -> &'static str {
    match (action_type, status) {
        ("generation", ActionStatus::Success) => "GEN-1000",
        ("generation", ActionStatus::Failure) => "GEN-2000",
        ("generation", ActionStatus::Warning) => "GEN-2001",
        ("generation", ActionStatus::Blocked) => "GEN-3000",
        ("conversion", ActionStatus::Success) => "CVT-1000",
        ("conversion", _) => "CVT-2000",
        ("debugging", ActionStatus::Success) => "DBG-1000",
        ("debugging", _) => "DBG-2000",
        ("credits", ActionStatus::Success) => "CRD-1001",
        ("credits", _) => "CRD-2000",
        ("n8n_export", ActionStatus::Success) => "N8N-1000",
        ("n8n_export", _) => "N8N-2000",
        ("checkout", ActionStatus::Success) => "USR-1000",
        ("checkout", _) => "USR-2000",
        ("webhook", ActionStatus::Success) => "SYS-1000",
        ("webhook", ActionStatus::Blocked) => "SEC-3000",
        ("webhook", _) => "SYS-2000",
        (_, ActionStatus::Success) => "SYS-1000",
        (_, ActionStatus::Blocked) => "SEC-3002",
        _ => "SYS-2000",
    }
}
