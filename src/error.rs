//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Reasons an authentication attempt can fail
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("no credential provided")]
    Missing,
    #[error("malformed credential")]
    Malformed,
    #[error("credential expired")]
    Expired,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid credentials")]
    InvalidCredentials,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Authentication failed: {0}")]
    Authentication(AuthFailure),

    #[error("Forbidden: {0}")]
    Authorization(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Upstream timeout: {0}")]
    UpstreamTimeout(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string())
            }
            AppError::Authentication(reason) => {
                (StatusCode::UNAUTHORIZED, format!("Authentication failed: {}", reason))
            }
            AppError::Authorization(e) => (StatusCode::FORBIDDEN, e.clone()),
            AppError::Validation(e) => (StatusCode::BAD_REQUEST, e.clone()),
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, e.clone()),
            AppError::Conflict(e) => (StatusCode::CONFLICT, e.clone()),
            AppError::UpstreamTimeout(e) => {
                tracing::error!("Upstream timeout: {}", e);
                (StatusCode::GATEWAY_TIMEOUT, format!("Upstream timeout: {}", e))
            }
            AppError::Upstream(e) => {
                tracing::error!("Upstream error: {}", e);
                (StatusCode::BAD_GATEWAY, format!("Upstream error: {}", e))
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal error".to_string())
            }
        };

        (status, message).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
