use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::error::PipelineError;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
    retryable: bool,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    retryable: bool,
}

impl AppError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: message.into(),
            retryable: true,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let message = err.to_string();
        match err {
            PipelineError::Validation(_) => Self::bad_request(message),
            PipelineError::NotFound(_) => Self::not_found(message),
            PipelineError::Conflict { .. } | PipelineError::InProgress(_) => Self::conflict(message),
            PipelineError::ResourceExhausted(_) => Self {
                status: StatusCode::UNPROCESSABLE_ENTITY,
                message,
                retryable: false,
            },
            PipelineError::TransientIo { .. }
            | PipelineError::Timeout { .. }
            | PipelineError::Database(_)
            | PipelineError::Cancelled => Self::unavailable(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.message,
            retryable: self.retryable,
        });
        (self.status, body).into_response()
    }
}
