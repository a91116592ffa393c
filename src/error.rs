use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::db::JobStoreError;
use crate::services::storage::StorageError;

/// Error returned by HTTP handlers.
///
/// Renders as `{"error": <message>, "code": <CODE>}`; internal failures are
/// logged and replaced with a generic message.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upload too large: {0}")]
    TooLarge(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    JobStore(#[from] JobStoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg.clone()),
            AppError::TooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::NotFound(id) | AppError::JobStore(JobStoreError::NotFound(id)) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Invalid reference_id: {id}"),
            ),
            AppError::Storage(e) => {
                tracing::error!(error = %e, "Image storage failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_FAILURE",
                    "Failed to store uploaded images".to_string(),
                )
            }
            AppError::JobStore(e) => {
                tracing::error!(error = %e, "Job store failure");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        (status, axum::Json(json!({ "error": message, "code": code }))).into_response()
    }
}
