//! Mining Error Types
//!
//! This module provides mining-specific error variants that integrate
//! with the unified `kernel::error::AppError` system.
//!
//! Only *rejections* and *infrastructure failures* are errors. An
//! evaluated attempt that fails (out of range, node unavailable, bad
//! roll) is a legitimate game outcome and travels as data, not as an
//! error — see `domain::value_objects::FailReason`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use kernel::error::{app_error::AppError, kind::ErrorKind};
use thiserror::Error;

/// Mining-specific result type alias
pub type MiningResult<T> = Result<T, MiningError>;

/// Mining-specific error variants
///
/// These map to appropriate HTTP status codes and can be converted to
/// `AppError` for unified error handling.
#[derive(Debug, Error)]
pub enum MiningError {
    /// Identity is not registered for mining
    #[error("Identity not registered")]
    IdentityNotFound,

    /// Node does not exist in the given session
    #[error("Node not found in session")]
    NodeNotFound,

    /// Attempt referenced in a review operation does not exist
    #[error("Attempt not found")]
    AttemptNotFound,

    /// Admission control rejected the request before evaluation
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Request failed structural validation
    #[error("Malformed request: {0}")]
    Malformed(String),

    /// Database error — the attempt never reached evaluation and is
    /// not recorded; callers should retry with backoff
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiningError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            MiningError::IdentityNotFound
            | MiningError::NodeNotFound
            | MiningError::AttemptNotFound => StatusCode::NOT_FOUND,
            MiningError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            MiningError::Malformed(_) => StatusCode::BAD_REQUEST,
            MiningError::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            MiningError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the ErrorKind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            MiningError::IdentityNotFound
            | MiningError::NodeNotFound
            | MiningError::AttemptNotFound => ErrorKind::NotFound,
            MiningError::RateLimitExceeded => ErrorKind::TooManyRequests,
            MiningError::Malformed(_) => ErrorKind::BadRequest,
            MiningError::Database(_) => ErrorKind::ServiceUnavailable,
            MiningError::Internal(_) => ErrorKind::InternalServerError,
        }
    }

    /// Wire reason code for gateway rejection messages
    pub fn reason_code(&self) -> &'static str {
        match self {
            MiningError::IdentityNotFound => "identity_not_found",
            MiningError::NodeNotFound => "node_not_found",
            MiningError::AttemptNotFound => "attempt_not_found",
            MiningError::RateLimitExceeded => "rate_limited",
            MiningError::Malformed(_) => "malformed_request",
            MiningError::Database(_) => "storage_unavailable",
            MiningError::Internal(_) => "internal_error",
        }
    }

    /// True when the caller should retry with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, MiningError::Database(_))
    }

    /// Log the error with appropriate level
    fn log(&self) {
        match self {
            MiningError::Database(e) => {
                tracing::error!(error = %e, "Mining database error");
            }
            MiningError::Internal(msg) => {
                tracing::error!(message = %msg, "Mining internal error");
            }
            MiningError::RateLimitExceeded => {
                tracing::warn!("Mining rate limit exceeded");
            }
            _ => {
                tracing::debug!(error = %self, "Mining error");
            }
        }
    }
}

impl From<MiningError> for AppError {
    fn from(err: MiningError) -> Self {
        let kind = err.kind();
        let message = err.to_string();
        AppError::new(kind, message)
    }
}

impl IntoResponse for MiningError {
    fn into_response(self) -> Response {
        self.log();
        let status = self.status_code();
        // Return empty body for security (don't leak details)
        (status, ()).into_response()
    }
}

impl From<platform::client::FingerprintError> for MiningError {
    fn from(err: platform::client::FingerprintError) -> Self {
        match err {
            platform::client::FingerprintError::MissingHeader(header) => {
                MiningError::Malformed(format!("missing required header: {header}"))
            }
        }
    }
}
