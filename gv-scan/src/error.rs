//! HTTP error mapping for gv-scan

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::CoordinatorError;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), a run is already queued or running
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Service cannot take work right now (503)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Common error: {0}")]
    Common(#[from] gv_common::Error),
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::RunAlreadyActive => ApiError::Conflict(err.to_string()),
            CoordinatorError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            CoordinatorError::QueueFull | CoordinatorError::WorkerStopped => {
                ApiError::Unavailable(err.to_string())
            }
            CoordinatorError::Persistence(e) => ApiError::Common(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
            ApiError::Common(ref err) => {
                let status = match err {
                    gv_common::Error::NotFound(_) => StatusCode::NOT_FOUND,
                    gv_common::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, "COMMON_ERROR", err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
