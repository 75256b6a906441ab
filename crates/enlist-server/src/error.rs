use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use enlist_core::error::AppError;

use crate::dto::ErrorResponse;

/// Wrapper so we can implement `IntoResponse` for `AppError`.
pub struct ApiError(pub AppError);

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            AppError::AlreadyRunning => (StatusCode::CONFLICT, "already_running"),
            AppError::NoWorkers => (StatusCode::BAD_REQUEST, "no_workers"),
            AppError::WorkerNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            AppError::InvalidJob(_) => (StatusCode::BAD_REQUEST, "validation_error"),
            AppError::SerializationError(_) => (StatusCode::BAD_REQUEST, "serialization_error"),
            AppError::Provider(_) | AppError::HttpError(_) => {
                (StatusCode::BAD_GATEWAY, "gateway_error")
            }
            AppError::ConfigError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::QueueAlreadyFilled | AppError::Generic(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.0.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
