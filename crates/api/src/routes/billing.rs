//! Billing endpoints: checkout initiation and Stripe webhook intake

use axum::{
    extract::{Extension, State},
    http::HeaderMap,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use streamsuite_billing::{
    AuditEntry, BillingInterval, CheckoutOptions, CheckoutResponse,
};
use streamsuite_shared::{ActionStatus, SubscriptionTier};

use crate::{
    auth::AuthUser,
    error::{ApiError, ApiResult},
    routes::extract_client_ip,
    state::AppState,
};

/// Request body for creating a checkout session
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    pub plan_id: String,
    #[serde(default)]
    pub billing_interval: Option<String>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
}

/// POST /stripe-checkout
///
/// Creates a Stripe Checkout session for the authenticated user. The user's
/// identity comes from the JWT, never the request body, so a client cannot
/// start a checkout on someone else's behalf.
pub async fn create_checkout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    headers: HeaderMap,
    Json(request): Json<CreateCheckoutRequest>,
) -> ApiResult<Json<CheckoutResponse>> {
    let tier = request
        .plan_id
        .parse::<SubscriptionTier>()
        .map_err(|_| ApiError::Validation(format!("Unknown plan: {}", request.plan_id)))?;

    let interval = match request.billing_interval.as_deref() {
        None => BillingInterval::Monthly,
        Some(raw) => BillingInterval::from_str(raw).ok_or_else(|| {
            ApiError::Validation(format!("Unknown billing interval: {}", raw))
        })?,
    };

    let options = CheckoutOptions {
        success_url: request.success_url,
        cancel_url: request.cancel_url,
    };

    let result = state
        .billing
        .checkout
        .create_subscription_checkout(auth_user.user_id, &auth_user.email, tier, interval, options)
        .await;

    let mut entry = AuditEntry::new(
        match &result {
            Ok(_) => "USR-1000",
            Err(_) => "USR-2000",
        },
        "checkout",
        match &result {
            Ok(_) => ActionStatus::Success,
            Err(_) => ActionStatus::Failure,
        },
    )
    .user(auth_user.user_id);

    if let Some(ip) = extract_client_ip(&headers) {
        entry = entry.ip_address(ip);
    }
    if let Some(agent) = headers.get("user-agent").and_then(|v| v.to_str().ok()) {
        entry = entry.user_agent(agent);
    }

    state.billing.audit.log_best_effort(entry).await;

    let session = result?;
    Ok(Json(CheckoutResponse::from(session)))
}

/// POST /stripe-webhook
///
/// Stripe webhook intake. The body must stay raw for signature verification;
/// parsing happens only after the signature checks out. A verification
/// failure is a security event and gets a SEC-band audit entry.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let event = match state.billing.webhooks.verify_event(&body, signature) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = ?e, "Stripe webhook signature verification failed");

            let mut entry = AuditEntry::new("SEC-3000", "webhook", ActionStatus::Blocked)
                .threat_metadata(json!({
                    "reason": "signature_verification_failed",
                    "payload_bytes": body.len(),
                }));
            if let Some(ip) = extract_client_ip(&headers) {
                entry = entry.ip_address(ip);
            }
            state.billing.audit.log_best_effort(entry).await;

            return Err(ApiError::BadRequest("Invalid webhook signature".to_string()));
        }
    };

    tracing::info!(
        event_type = %event.type_,
        event_id = %event.id,
        "Stripe webhook event verified"
    );

    state.billing.webhooks.handle_event(event).await?;

    Ok(Json(json!({ "received": true })))
}
