use actix_web::{HttpResponse, ResponseError, http::StatusCode};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Property not handled: {0:#x}")]
    NotHandled(i32),
    #[error("Property unavailable: {0:#x}")]
    Unavailable(i32),
    #[error("Acquisition failed: {0}")]
    Acquire(String),
    #[error("I/O error: {0}")]
    Io(String),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("GPIO error: {0}")]
    Gpio(String),
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotHandled(_) => StatusCode::NOT_FOUND,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::InvalidValue(_) => StatusCode::BAD_REQUEST,
            AppError::Acquire(_) | AppError::Io(_) | AppError::Config(_) | AppError::Gpio(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
