/// Unified error types for the moderation core
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for moderation operations
#[derive(Error, Debug)]
pub enum ModerationError {
    /// Bad enum values, empty fields, out-of-range numbers, invalid patterns
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Missing flag, report, rule, word, penalty, queue item or content target
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backward state transition or lost uniqueness race
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Caller is not a moderator or lacks the required capability
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Caller may not see or touch this particular record
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Missing or invalid caller credentials at the transport boundary
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Caller deadline elapsed before the operation completed
    #[error("Deadline exceeded")]
    Timeout,

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ModerationError {
    /// Stable wire code for this error kind
    pub fn code(&self) -> &'static str {
        match self {
            ModerationError::InvalidArgument(_) => "InvalidRequest",
            ModerationError::NotFound(_) => "NotFound",
            ModerationError::Conflict(_) => "Conflict",
            ModerationError::Unauthorized(_) => "Unauthorized",
            ModerationError::Forbidden(_) => "Forbidden",
            ModerationError::Authentication(_) => "AuthenticationRequired",
            ModerationError::Timeout => "DeadlineExceeded",
            ModerationError::Database(_) | ModerationError::Io(_) | ModerationError::Internal(_) => {
                "InternalServerError"
            }
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ModerationError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ModerationError::NotFound(_) => StatusCode::NOT_FOUND,
            ModerationError::Conflict(_) => StatusCode::CONFLICT,
            ModerationError::Unauthorized(_) | ModerationError::Forbidden(_) => StatusCode::FORBIDDEN,
            ModerationError::Authentication(_) => StatusCode::UNAUTHORIZED,
            ModerationError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ModerationError::Database(_) | ModerationError::Io(_) | ModerationError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns true for the internal-class kinds whose text must not leak
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            ModerationError::Database(_) | ModerationError::Io(_) | ModerationError::Internal(_)
        )
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ModerationError {
    fn into_response(self) -> Response {
        let message = if self.is_internal() {
            tracing::error!("Internal failure: {}", self);
            "Internal server error".to_string() // Don't leak details
        } else {
            self.to_string()
        };

        let body = Json(ErrorResponse {
            error: self.code().to_string(),
            message,
        });

        (self.status(), body).into_response()
    }
}

/// Result type alias for moderation operations
pub type ModResult<T> = Result<T, ModerationError>;
