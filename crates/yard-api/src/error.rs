//! # API Errors
//!
//! One error type implementing `axum::response::IntoResponse`, mapping
//! the store, worker, and validation errors onto HTTP statuses with a
//! structured JSON body. Internal and upstream failure details are
//! logged, never returned to clients.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use yard_core::ConfigError;
use yard_store::StoreError;
use yard_worker::WorkerError;

/// Structured JSON error response body.
///
/// Every error response uses this envelope. The `details` field carries
/// extra context for validation failures and is omitted otherwise.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "VALIDATION_ERROR").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    /// Additional details, present only for client errors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Error type for all API handlers.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Run or artifact not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Submission failed validation (422).
    #[error("validation error: {0}")]
    Validation(String),

    /// Request body could not be parsed (422). Multipart decode failures
    /// and malformed spec JSON both land here; only broken HTTP framing
    /// is a 400.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A protected bucket rejected the offered password (403).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Internal server error (500). Message is logged but not returned
    /// to the client.
    #[error("internal error: {0}")]
    Internal(String),

    /// The object store returned an error or is unreachable (502).
    #[error("upstream object store error: {0}")]
    Upstream(String),

    /// The job queue is shut down (503).
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            Self::BadRequest(_) => (StatusCode::UNPROCESSABLE_ENTITY, "BAD_REQUEST"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            Self::Upstream(_) => (StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
        }
    }

    /// Construct a not-found error (404).
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Construct a validation error (422).
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal/upstream error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            Self::Upstream(_) => "An upstream service error occurred".to_string(),
            other => other.to_string(),
        };

        match &self {
            Self::Internal(_) => tracing::error!(error = %self, "internal server error"),
            Self::Upstream(_) => tracing::error!(error = %self, "upstream store error"),
            Self::Unavailable(_) => tracing::warn!(error = %self, "service unavailable"),
            _ => {}
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match &err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::PermissionDenied { .. } => Self::Forbidden(err.to_string()),
            StoreError::Io(_) => Self::Internal(err.to_string()),
            StoreError::InvalidMeta(_)
            | StoreError::InvalidResponse(_)
            | StoreError::Transport(_)
            | StoreError::UnexpectedStatus { .. }
            | StoreError::UploadAborted { .. } => Self::Upstream(err.to_string()),
        }
    }
}

impl From<WorkerError> for ApiError {
    fn from(err: WorkerError) -> Self {
        match err {
            WorkerError::QueueClosed => Self::Unavailable(err.to_string()),
            WorkerError::Spec(err) => err.into(),
            WorkerError::Store(err) => err.into(),
            WorkerError::Routine(err) => Self::Internal(err.to_string()),
            WorkerError::Io(err) => Self::Internal(err.to_string()),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self::BadRequest(format!("invalid multipart body: {err}"))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(format!("staging upload failed: {err}"))
    }
}
