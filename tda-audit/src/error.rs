//! Error types for tda-audit
//!
//! Only caller misuse (validation, precondition conflicts, unknown ids) and
//! fatal orchestrator failures surface here. Provider and bloc failures are
//! contained inside the pipeline and never reach the caller.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Malformed or missing input (400), nothing was mutated
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Wrong status for the requested transition (409), nothing was mutated
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Active audit already exists for the destination (409)
    #[error("An active audit already exists for this destination: {audit_id}")]
    Duplicate { audit_id: Uuid },

    /// Segment exceeded its wall-clock ceiling (504)
    #[error("Segment {segment} exceeded its {ceiling:?} ceiling")]
    Timeout { segment: String, ceiling: Duration },

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Shared library error (database, serialization, config)
    #[error("Common error: {0}")]
    Common(#[from] tda_common::Error),
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        ApiError::Common(tda_common::Error::Database(err))
    }
}

impl ApiError {
    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Duplicate { .. } => "DUPLICATE_AUDIT",
            ApiError::Timeout { .. } => "SEGMENT_TIMEOUT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
            ApiError::Common(tda_common::Error::NotFound(_)) => "NOT_FOUND",
            ApiError::Common(tda_common::Error::InvalidInput(_)) => "BAD_REQUEST",
            ApiError::Common(tda_common::Error::Conflict(_)) => "CONFLICT",
            ApiError::Common(_) => "COMMON_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) | ApiError::Common(tda_common::Error::NotFound(_)) => {
                StatusCode::NOT_FOUND
            }
            ApiError::BadRequest(_) | ApiError::Common(tda_common::Error::InvalidInput(_)) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Conflict(_)
            | ApiError::Duplicate { .. }
            | ApiError::Common(tda_common::Error::Conflict(_)) => StatusCode::CONFLICT,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) | ApiError::Common(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Caller misuse, as opposed to a failure on our side
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        let body = match &self {
            ApiError::Duplicate { audit_id } => json!({
                "error": {
                    "code": code,
                    "message": message,
                    "audit_id": audit_id,
                }
            }),
            _ => json!({
                "error": {
                    "code": code,
                    "message": message,
                }
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers and pipeline entry points
pub type ApiResult<T> = Result<T, ApiError>;
