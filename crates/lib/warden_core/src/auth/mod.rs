//! Authentication and authorization logic.
//!
//! Provides password hashing, JWT management, and the [`service::AuthService`]
//! that orchestrates registration, login, refresh and logout on top of a
//! [`crate::store::AuthStore`].

pub mod jwt;
pub mod password;
pub mod service;

use thiserror::Error;

use crate::config::ConfigError;
use crate::store::StoreError;
use password::PasswordViolation;

/// Authentication errors surfaced by [`service::AuthService`].
///
/// Display strings of `InvalidCredentials` and `Unauthenticated` are
/// generic and safe to forward to clients verbatim.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Invalid or expired token")]
    Unauthenticated,

    #[error("User with this email or username already exists")]
    DuplicateIdentity,

    #[error("Weak password: {0}")]
    WeakPassword(#[from] PasswordViolation),

    #[error("User not found")]
    NotFound,

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Only the `users` unique constraints mean the identity is taken; any other
/// conflict is a store fault.
impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(constraint) if constraint.starts_with("users_") => {
                AuthError::DuplicateIdentity
            }
            other => AuthError::Store(other),
        }
    }
}
