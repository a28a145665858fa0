//! Error types for StreamSuite

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Billing error: {0}")]
    Billing(String),

    #[error("Internal error: {0}")]
    Internal(String),
}
