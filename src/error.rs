use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::{
    intake::IntakeError,
    lifecycle::StartError,
    models::{ApiError, ApiErrorDetail},
};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("session not found")]
    SessionNotFound,
    #[error("image not found")]
    HandleNotFound,
    #[error("there is no generated image yet")]
    NoResult,
    #[error(transparent)]
    Intake(#[from] IntakeError),
    #[error(transparent)]
    Start(#[from] StartError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::SessionNotFound | AppError::HandleNotFound | AppError::NoResult => {
                StatusCode::NOT_FOUND
            }
            AppError::Intake(IntakeError::UnsupportedMediaType(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            AppError::Intake(IntakeError::EmptyFile) => StatusCode::BAD_REQUEST,
            AppError::Start(StartError::Invalid(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Start(StartError::AlreadyInFlight) => StatusCode::CONFLICT,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::SessionNotFound | AppError::HandleNotFound | AppError::NoResult => {
                "not_found"
            }
            AppError::Intake(_) => "invalid_upload",
            AppError::Start(StartError::Invalid(_)) => "validation_error",
            AppError::Start(StartError::AlreadyInFlight) => "in_flight",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        tracing::debug!(%status, "request failed: {}", self);
        let body = ApiError {
            error: ApiErrorDetail { message: self.to_string(), r#type: self.kind() },
        };
        (status, Json(body)).into_response()
    }
}
