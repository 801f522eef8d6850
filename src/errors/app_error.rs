//! Application-level error type for HTTP handlers.
//!
//! WebSocket traffic reports failures through `error` envelopes on the open
//! connection; this type only covers the plain HTTP surface (health probe,
//! audio artifact downloads).

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors returned by REST handlers.
#[derive(Debug, Error)]
pub enum AppError {
    /// Requested resource does not exist (or has expired).
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unexpected server-side failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for REST handlers.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
