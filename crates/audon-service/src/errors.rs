//! Audon service error types.
//!
//! All errors map to HTTP status codes via the `IntoResponse` impl. Store and
//! live-service failures are logged server-side and reported to clients with
//! a generic message.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AudonCommonError;
use serde::Serialize;
use thiserror::Error;

/// Audon service error type.
///
/// - `BadRequest`: 400
/// - `InvalidSession`: 401
/// - `Forbidden`: 403
/// - `NotFound`: 404
/// - `Conflict`: 409
/// - `Gone`: 410
/// - `Database`, `LiveService`, `Internal`: 500
#[derive(Debug, Error)]
pub enum AudonError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid session: {0}")]
    InvalidSession(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Live service error: {0}")]
    LiveService(String),

    #[error("Internal server error")]
    Internal,
}

impl AudonError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            AudonError::BadRequest(_) => 400,
            AudonError::InvalidSession(_) => 401,
            AudonError::Forbidden(_) => 403,
            AudonError::NotFound(_) => 404,
            AudonError::Conflict(_) => 409,
            AudonError::Gone(_) => 410,
            AudonError::Database(_) | AudonError::LiveService(_) | AudonError::Internal => 500,
        }
    }

    /// Short label used as a metrics dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            AudonError::BadRequest(_) => "invalid_input",
            AudonError::InvalidSession(_) => "invalid_session",
            AudonError::Forbidden(_) => "forbidden",
            AudonError::NotFound(_) => "not_found",
            AudonError::Conflict(_) => "conflict",
            AudonError::Gone(_) => "gone",
            AudonError::Database(_) | AudonError::LiveService(_) | AudonError::Internal => {
                "internal"
            }
        }
    }

    /// True for store or external-service failures.
    pub fn is_internal(&self) -> bool {
        self.status_code() >= 500
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AudonError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AudonError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone())
            }
            AudonError::InvalidSession(reason) => {
                (StatusCode::UNAUTHORIZED, "INVALID_SESSION", reason.clone())
            }
            AudonError::Forbidden(reason) => (StatusCode::FORBIDDEN, "FORBIDDEN", reason.clone()),
            AudonError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone())
            }
            AudonError::Conflict(reason) => (StatusCode::CONFLICT, "CONFLICT", reason.clone()),
            AudonError::Gone(reason) => (StatusCode::GONE, "GONE", reason.clone()),
            AudonError::Database(err) => {
                tracing::error!(target: "audon.database", error = %err, "Database operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "An internal database error occurred".to_string(),
                )
            }
            AudonError::LiveService(err) => {
                tracing::error!(target: "audon.live", error = %err, "Live service call failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "LIVE_SERVICE_ERROR",
                    "The live audio service is unavailable".to_string(),
                )
            }
            AudonError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<sqlx::Error> for AudonError {
    fn from(err: sqlx::Error) -> Self {
        AudonError::Database(err.to_string())
    }
}

impl From<redis::RedisError> for AudonError {
    fn from(err: redis::RedisError) -> Self {
        AudonError::Database(format!("session store: {err}"))
    }
}

impl From<AudonCommonError> for AudonError {
    fn from(err: AudonCommonError) -> Self {
        match err {
            AudonCommonError::InvalidIdentifier(_) => {
                AudonError::BadRequest("invalid_request_format".to_string())
            }
            other => {
                tracing::error!(target: "audon.common", error = %other, "Common operation failed");
                AudonError::Internal
            }
        }
    }
}
