//! JWT authentication

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiError;

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Email
    pub email: String,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// The authenticated user attached to request extensions by [`require_auth`]
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
}

/// State for authentication middleware
#[derive(Clone)]
pub struct AuthState {
    decoding_key: DecodingKey,
}

impl AuthState {
    pub fn new(jwt_secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
        }
    }

    fn verify(&self, token: &str) -> Result<Claims, ApiError> {
        // Explicit algorithm prevents algorithm confusion attacks
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| ApiError::InvalidToken)
    }
}

fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(String::from)
}

/// Middleware that requires a valid JWT and attaches [`AuthUser`]
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match extract_bearer_token(&request) {
        Some(token) => token,
        None => {
            tracing::warn!(path = %request.uri().path(), "Missing Authorization header");
            return ApiError::Unauthorized.into_response();
        }
    };

    match auth_state.verify(&token) {
        Ok(claims) => {
            let auth_user = AuthUser {
                user_id: claims.sub,
                email: claims.email,
            };
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %request.uri().path(), "JWT validation failed");
            err.into_response()
        }
    }
}
