//! API routes

pub mod billing;
pub mod health;

use axum::{
    http::HeaderMap,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{auth::require_auth, state::AppState};

/// Extract client IP address from request headers.
/// Checks common proxy headers in order of preference.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("cf-connecting-ip") // Cloudflare
        .or_else(|| headers.get("x-real-ip"))
        .or_else(|| headers.get("x-forwarded-for"))
        .and_then(|h| h.to_str().ok())
        .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
}

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // Health check routes (at root level for infrastructure monitoring)
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness));

    // Stripe webhook is public; authenticity comes from signature
    // verification, not a session
    let public_routes = Router::new().route("/stripe-webhook", post(billing::stripe_webhook));

    let protected_routes = Router::new()
        .route("/stripe-checkout", post(billing::create_checkout))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    Router::new()
        .merge(health_routes)
        .merge(public_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
