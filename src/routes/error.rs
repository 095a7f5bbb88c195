use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::services::queue::QueueError;

pub const NO_IMAGE_MESSAGE: &str =
    "Please provide either an image file, image URL, or base64 encoded image";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{}", NO_IMAGE_MESSAGE)]
    NoImageProvided,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unsupported image: {0}")]
    UnsupportedImage(String),

    #[error("Task {0} not found")]
    JobNotFound(String),

    #[error("Queue unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NoImageProvided | ApiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ApiError::UnsupportedImage(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::JobNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BrokerUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NoImageProvided => "NO_IMAGE_PROVIDED",
            ApiError::InvalidInput(_) => "INVALID_INPUT",
            ApiError::UnsupportedImage(_) => "UNSUPPORTED_IMAGE",
            ApiError::JobNotFound(_) => "JOB_NOT_FOUND",
            ApiError::BrokerUnavailable(_) => "BROKER_UNAVAILABLE",
            ApiError::Internal(_) => "INTERNAL",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<QueueError> for ApiError {
    fn from(value: QueueError) -> Self {
        match value {
            QueueError::BrokerUnavailable(_) => ApiError::BrokerUnavailable(value.to_string()),
            QueueError::Serialize(_)
            | QueueError::CorruptRecord { .. }
            | QueueError::Transition(_)
            | QueueError::StaleState { .. } => ApiError::Internal(value.to_string()),
        }
    }
}

impl From<garde::Report> for ApiError {
    fn from(value: garde::Report) -> Self {
        ApiError::InvalidInput(value.to_string())
    }
}
