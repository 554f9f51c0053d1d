//! Error types for scribe-ai
//!
//! `TranscriptionError` covers failures inside a job's pipeline and is turned
//! into a FAILED job by the orchestrator. `ApiError` is what HTTP handlers
//! return.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Pipeline failure for a single job
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TranscriptionError {
    /// Source unreachable, unsupported or download failed
    #[error("{0}")]
    Acquisition(String),

    /// Audio could not be decoded or resampled
    #[error("{0}")]
    Decode(String),

    /// No usable pitch events (or malformed backend output)
    #[error("{0}")]
    Detection(String),

    /// No valid target pitch set
    #[error("{0}")]
    Quantization(String),

    /// Cancelled through the API or during shutdown
    #[error("Job cancelled")]
    Cancelled,

    /// Wall-clock limit exceeded
    #[error("Processing timed out after {} seconds", .0.as_secs_f64())]
    Timeout(std::time::Duration),

    /// Worker panicked or was aborted
    #[error("{0}")]
    Internal(String),
}

impl TranscriptionError {
    /// Message stored on the failed job and broadcast to observers
    pub fn failure_message(&self) -> String {
        match self {
            TranscriptionError::Acquisition(msg) => format!("Audio extraction failed: {}", msg),
            TranscriptionError::Cancelled | TranscriptionError::Timeout(_) => self.to_string(),
            other => format!("Processing failed: {}", other),
        }
    }
}

impl From<tokio::task::JoinError> for TranscriptionError {
    fn from(err: tokio::task::JoinError) -> Self {
        TranscriptionError::Internal(format!("Worker task failed: {}", err))
    }
}

/// Result type for pipeline stages
pub type PipelineResult<T> = Result<T, TranscriptionError>;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Upload exceeds the configured limit (413)
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// scribe-common error
    #[error("Common error: {0}")]
    Common(#[from] scribe_common::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg)
            }
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                msg,
            ),
            ApiError::Io(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO_ERROR",
                err.to_string(),
            ),
            ApiError::Common(scribe_common::Error::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", msg)
            }
            ApiError::Common(scribe_common::Error::InvalidInput(msg)) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
            }
            ApiError::Common(ref err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "COMMON_ERROR",
                err.to_string(),
            ),
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
