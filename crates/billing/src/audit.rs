//! Audit log
//!
//! Append-only record of billing-relevant actions, keyed by structured event
//! codes from [`crate::event_codes`]. Audit writes must never fail a user
//! request: callers log insert errors and move on.

use serde_json::Value as JsonValue;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use streamsuite_shared::ActionStatus;

use crate::error::BillingResult;

/// A persisted audit log row
#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub event_id: String,
    pub action_type: String,
    pub action_status: ActionStatus,
    pub credits_used: Option<i64>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub threat_metadata: Option<JsonValue>,
    pub created_at: OffsetDateTime,
}

/// Builder for an audit entry
#[derive(Debug)]
pub struct AuditEntry {
    user_id: Option<Uuid>,
    event_id: &'static str,
    action_type: String,
    action_status: ActionStatus,
    credits_used: Option<i64>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    threat_metadata: Option<JsonValue>,
}

impl AuditEntry {
    pub fn new(event_id: &'static str, action_type: impl Into<String>, status: ActionStatus) -> Self {
        Self {
            user_id: None,
            event_id,
            action_type: action_type.into(),
            action_status: status,
            credits_used: None,
            ip_address: None,
            user_agent: None,
            threat_metadata: None,
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn credits_used(mut self, credits: i64) -> Self {
        self.credits_used = Some(credits);
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Attach security context (signature details, suspicious input, etc.)
    pub fn threat_metadata(mut self, metadata: JsonValue) -> Self {
        self.threat_metadata = Some(metadata);
        self
    }
}

/// Audit logger backed by the audit_logs table
#[derive(Clone)]
pub struct AuditLogger {
    pool: PgPool,
}

impl AuditLogger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist an audit entry
    pub async fn log(&self, entry: AuditEntry) -> BillingResult<Uuid> {
        let id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO audit_logs
                 (id, user_id, event_id, action_type, action_status, credits_used,
                  ip_address, user_agent, threat_metadata)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(id)
        .bind(entry.user_id)
        .bind(entry.event_id)
        .bind(&entry.action_type)
        .bind(entry.action_status)
        .bind(entry.credits_used)
        .bind(entry.ip_address.as_deref())
        .bind(entry.user_agent.as_deref())
        .bind(entry.threat_metadata)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            audit_id = %id,
            event_id = %entry.event_id,
            action_type = %entry.action_type,
            action_status = %entry.action_status,
            "Recorded audit entry"
        );

        Ok(id)
    }

    /// Log an entry, swallowing failures. Audit writes are best-effort from
    /// the caller's perspective; a failed insert is logged but never bubbles
    /// into the user-facing result.
    pub async fn log_best_effort(&self, entry: AuditEntry) {
        let event_id = entry.event_id;
        if let Err(e) = self.log(entry).await {
            tracing::warn!(
                event_id = %event_id,
                error = %e,
                "Failed to write audit entry"
            );
        }
    }

    /// Recent audit entries for a user, newest first
    pub async fn recent_for_user(&self, user_id: Uuid, limit: i64) -> BillingResult<Vec<AuditLog>> {
        let rows = sqlx::query_as(
            "SELECT id, user_id, event_id, action_type, action_status, credits_used,
                    ip_address, user_agent, threat_metadata, created_at
             FROM audit_logs
             WHERE user_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Recent audit entries carrying a given event code, newest first
    pub async fn recent_by_code(&self, event_id: &str, limit: i64) -> BillingResult<Vec<AuditLog>> {
        let rows = sqlx::query_as(
            "SELECT id, user_id, event_id, action_type, action_status, credits_used,
                    ip_address, user_agent, threat_metadata, created_at
             FROM audit_logs
             WHERE event_id = $1
             ORDER BY created_at DESC
             LIMIT $2",
        )
        .bind(event_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}
