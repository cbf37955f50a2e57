//! Error handling

use axum::{
    response::{IntoResponse, Response},
    http::StatusCode,
    Json,
};
use serde_json::json;

use crate::model::{InferenceError, UnknownModelError};
use crate::scoring::ScoringError;

pub type AppResult<T> = Result<T, AppError>;

/// Caller-visible request failures
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // Auth errors
    #[error("Invalid API Key")]
    Auth,

    // Validation errors
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    // Evaluation errors
    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Label used for the error counter
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Auth => "auth",
            AppError::Validation(_) | AppError::PayloadTooLarge(_) => "validation",
            AppError::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Auth => StatusCode::FORBIDDEN,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn wrong_length(expected: usize, actual: usize) -> Self {
        AppError::Validation(format!(
            "Input data must have {} features, got {}",
            expected, actual
        ))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                "Prediction error".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<UnknownModelError> for AppError {
    fn from(err: UnknownModelError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<InferenceError> for AppError {
    fn from(err: InferenceError) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<ScoringError> for AppError {
    fn from(err: ScoringError) -> Self {
        AppError::Internal(err.to_string())
    }
}
