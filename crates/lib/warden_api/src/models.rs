//! Request and response bodies.
//!
//! Every response is wrapped in [`Envelope`]:
//! `{status, status_code, message?, error?: {message, note?}, data?}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warden_core::models::auth::{NewIdentity, Profile, Session, TokenPair};

use crate::error::AppError;

pub const STATUS_SUCCESS: &str = "success";
pub const STATUS_ERROR: &str = "error";
pub const STATUS_FAIL: &str = "fail";

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Uniform response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> Envelope<T> {
    pub fn success(status: StatusCode, message: impl Into<String>, data: T) -> Self {
        Self {
            status: STATUS_SUCCESS.into(),
            status_code: status.as_u16(),
            message: Some(message.into()),
            error: None,
            data: Some(data),
        }
    }
}

impl Envelope<()> {
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.into(),
            status_code: status.as_u16(),
            message: None,
            error: Some(ErrorDetail {
                message: message.into(),
                note: None,
            }),
            data: None,
        }
    }

    /// Client input was rejected; `note` says which rule.
    pub fn fail(status: StatusCode, message: impl Into<String>, note: impl Into<String>) -> Self {
        Self {
            status: STATUS_FAIL.into(),
            status_code: status.as_u16(),
            message: None,
            error: Some(ErrorDetail {
                message: message.into(),
                note: Some(note.into()),
            }),
            data: None,
        }
    }

    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: STATUS_SUCCESS.into(),
            status_code: status.as_u16(),
            message: Some(message.into()),
            error: None,
            data: None,
        }
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK);
        (status, Json(self)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    pub phone: String,
    pub email: String,
    pub password: String,
}

fn check_len(field: &str, value: &str, min: usize, max: usize) -> Result<(), AppError> {
    let n = value.chars().count();
    if n < min || n > max {
        return Err(AppError::Validation(format!(
            "{field} must be between {min} and {max} characters"
        )));
    }
    Ok(())
}

/// Trimmed value, or `None` when absent or blank.
fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `local@domain.tld` with no whitespace.
fn plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        check_len("username", self.username.trim(), 3, 100)?;
        if let Some(first) = non_blank(self.first_name.as_deref()) {
            check_len("first_name", first, 2, 100)?;
        }
        if let Some(last) = non_blank(self.last_name.as_deref()) {
            check_len("last_name", last, 2, 100)?;
        }
        check_len("phone", self.phone.trim(), 10, 20)?;
        let email = self.email.trim();
        check_len("email", email, 3, 100)?;
        if !plausible_email(email) {
            return Err(AppError::Validation("email must be a valid email address".into()));
        }
        if self.password.is_empty() {
            return Err(AppError::Validation("password is required".into()));
        }
        Ok(())
    }

    /// Split into the trimmed identity and the raw password. Blank names
    /// become `None`.
    pub fn into_parts(self) -> (NewIdentity, String) {
        (
            NewIdentity {
                first_name: non_blank(self.first_name.as_deref()).map(str::to_string),
                last_name: non_blank(self.last_name.as_deref()).map(str::to_string),
                username: self.username.trim().to_string(),
                email: self.email.trim().to_string(),
                phone: self.phone.trim().to_string(),
            },
            self.password,
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if !plausible_email(self.email.trim()) {
            return Err(AppError::Validation("email must be a valid email address".into()));
        }
        if self.password.is_empty() {
            return Err(AppError::Validation("password is required".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

/// Token pair plus the subject it was issued for.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires.
    pub expires_in: i64,
}

impl SessionResponse {
    pub fn new(session: Session, now: DateTime<Utc>) -> Self {
        let Session { profile, tokens } = session;
        Self {
            id: profile.id,
            username: profile.username,
            email: profile.email,
            expires_in: expires_in(&tokens, now),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

impl TokenResponse {
    pub fn new(tokens: TokenPair, now: DateTime<Utc>) -> Self {
        Self {
            expires_in: expires_in(&tokens, now),
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer".into(),
        }
    }
}

fn expires_in(tokens: &TokenPair, now: DateTime<Utc>) -> i64 {
    (tokens.access_expires_at - now).num_seconds().max(0)
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileResponse {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub phone: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

impl From<Profile> for ProfileResponse {
    fn from(p: Profile) -> Self {
        Self {
            id: p.id,
            username: p.username,
            first_name: p.first_name,
            last_name: p.last_name,
            phone: p.phone,
            email: p.email,
            created_at: p.created_at,
            updated_at: p.updated_at,
            last_login: p.last_login,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
