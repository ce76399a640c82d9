use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::core::error::ConversionError;
use crate::core::job::JobStatus;
use crate::core::store::CollectError;

/// Application error type
///
/// Client errors carry their message in the response body. Server errors are
/// logged and answered with a generic message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Job is still {0}")]
    NotReady(JobStatus),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Provider failure: {0}")]
    BadGateway(String),

    #[error("Timed out: {0}")]
    GatewayTimeout(String),

    #[error("Internal server error: {0}")]
    InternalServerError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::NotReady(_) | Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal server error: {}", msg);
                "Internal server error".to_string()
            }
            AppError::NotReady(job_status) => {
                format!("Job is not finished yet (status: {job_status})")
            }
            AppError::BadGateway(msg) => {
                tracing::warn!("Provider failure: {}", msg);
                msg
            }
            AppError::BadRequest(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::Unprocessable(msg)
            | AppError::GatewayTimeout(msg) => {
                tracing::debug!(status = status.as_u16(), "Request rejected: {}", msg);
                msg
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        let message = err.to_string();
        match err {
            ConversionError::InputError(msg) => AppError::BadRequest(msg),
            ConversionError::JobNotFound(_) => AppError::NotFound(message),
            ConversionError::ChunkFailed { .. } => AppError::BadGateway(message),
            ConversionError::Timeout(_) => AppError::GatewayTimeout(message),
            ConversionError::Cancelled => AppError::Conflict(message),
            ConversionError::Configuration(_)
            | ConversionError::AssemblyError(_)
            | ConversionError::Io(_) => AppError::InternalServerError(message),
        }
    }
}

impl From<CollectError> for AppError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::NotFound(id) => AppError::NotFound(format!("Job not found: {id}")),
            CollectError::NotReady(status) => AppError::NotReady(status),
            CollectError::NoArtifact(reason) => {
                AppError::Unprocessable(format!("Job produced no audio: {reason}"))
            }
        }
    }
}

impl From<Box<dyn std::error::Error>> for AppError {
    fn from(err: Box<dyn std::error::Error>) -> Self {
        AppError::InternalServerError(err.to_string())
    }
}

// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;
