//! Application error types.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, error};
use warden_core::auth::AuthError;
use warden_core::store::StoreError;

use crate::models::Envelope;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Database unavailable: {0}")]
    DbUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::DbUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            AppError::Validation(note) => Envelope::fail(status, "Validation failed", note.as_str()),
            AppError::NotFound(m) | AppError::Conflict(m) | AppError::Unauthorized(m) => {
                Envelope::error(status, m.as_str())
            }
            AppError::RateLimited => {
                Envelope::error(status, "Rate limit exceeded, please try again later")
            }
            AppError::DbUnavailable(detail) => {
                error!(detail = %detail, "store unavailable");
                Envelope::error(status, "Service temporarily unavailable")
            }
            AppError::Internal(detail) => {
                error!(detail = %detail, "internal error");
                Envelope::error(status, "Internal server error")
            }
        };
        body.into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => AppError::NotFound("Not found".into()),
            StoreError::Conflict(constraint) => {
                AppError::Internal(format!("unexpected conflict on {constraint}"))
            }
            StoreError::Db(sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed) => {
                AppError::DbUnavailable(e.to_string())
            }
            StoreError::Unavailable(m) => AppError::DbUnavailable(m),
            StoreError::Db(other) => AppError::Internal(other.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        debug!(error = %e, "request body rejected");
        AppError::Validation("Invalid request format".into())
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Validation(msg) => AppError::Validation(msg),
            AuthError::WeakPassword(v) => AppError::Validation(v.to_string()),
            AuthError::InvalidCredentials | AuthError::Unauthenticated => {
                AppError::Unauthorized(e.to_string())
            }
            AuthError::DuplicateIdentity => AppError::Conflict(e.to_string()),
            AuthError::NotFound => AppError::NotFound(e.to_string()),
            AuthError::Store(s) => AppError::from(s),
            AuthError::Config(c) => AppError::Internal(c.to_string()),
            AuthError::Internal(msg) => AppError::Internal(msg),
        }
    }
}
