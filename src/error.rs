use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Request(String),

    #[error("JSON parsing error: {0}")]
    Json(String),

    #[error("DNS resolution error: {0}")]
    Dns(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resource not found: {0}")]
    NotFound(String),
}

// From trait implementations for common error types
impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Request(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Json(err.to_string())
    }
}

impl From<hickory_resolver::error::ResolveError> for AppError {
    fn from(err: hickory_resolver::error::ResolveError) -> Self {
        AppError::Dns(err.to_string())
    }
}

// HTTP error responses carry a plain-text body
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Request(_) => StatusCode::BAD_GATEWAY,
            AppError::Json(_) => StatusCode::BAD_GATEWAY,
            AppError::Dns(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        (status, self.to_string()).into_response()
    }
}
