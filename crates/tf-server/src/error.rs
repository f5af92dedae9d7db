//! Error-to-HTTP response conversion.
//!
//! Route handlers return `Result<T, AppError>` and use `?` on
//! [`tf_core::Error`] directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Wrapper so we can implement `IntoResponse` for an external type.
pub struct AppError(tf_core::Error);

impl From<tf_core::Error> for AppError {
    fn from(e: tf_core::Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self.0, "Server error in API handler");
        }

        let code = match &self.0 {
            tf_core::Error::NotFound { .. } => "not_found",
            tf_core::Error::Validation(_) => "validation_error",
            tf_core::Error::Database { .. } => "database_error",
            tf_core::Error::Io { .. } => "io_error",
            tf_core::Error::Spawn { .. } | tf_core::Error::Execution { .. } => "tool_error",
            tf_core::Error::Timeout { .. } => "timeout",
            tf_core::Error::InvalidTransition { .. } => "invalid_transition",
            tf_core::Error::JobFailed(_) => "job_failed",
            tf_core::Error::Internal(_) => "internal_error",
        };

        let body = json!({
            "error": self.0.to_string(),
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
