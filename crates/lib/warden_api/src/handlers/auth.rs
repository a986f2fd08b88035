//! Authentication request handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Extension;
use chrono::Utc;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::extract::JsonBody;
use crate::middleware::auth::{AuthenticatedUser, bearer_token};
use crate::models::{
    Envelope, LoginRequest, ProfileResponse, RefreshRequest, RegisterRequest, SessionResponse,
    TokenResponse,
};

/// `POST /api/v1/auth/register`: create an account and log it in.
pub async fn register_handler(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RegisterRequest>,
) -> AppResult<Envelope<SessionResponse>> {
    body.validate()?;
    let (identity, password) = body.into_parts();
    let session = state.service.register(identity, &password).await?;
    Ok(Envelope::success(
        StatusCode::CREATED,
        "User registered successfully",
        SessionResponse::new(session, Utc::now()),
    ))
}

/// `POST /api/v1/auth/login`: authenticate with email + password.
pub async fn login_handler(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<LoginRequest>,
) -> AppResult<Envelope<SessionResponse>> {
    body.validate()?;
    let session = state.service.login(&body.email, &body.password).await?;
    Ok(Envelope::success(
        StatusCode::OK,
        "Login successful",
        SessionResponse::new(session, Utc::now()),
    ))
}

/// `POST /api/v1/auth/refresh`: trade a refresh token for a new pair.
pub async fn refresh_handler(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<RefreshRequest>,
) -> AppResult<Envelope<TokenResponse>> {
    if body.refresh_token.trim().is_empty() {
        return Err(AppError::Validation("refresh_token is required".into()));
    }
    let tokens = state.service.refresh(body.refresh_token.trim()).await?;
    Ok(Envelope::success(
        StatusCode::OK,
        "Token refreshed",
        TokenResponse::new(tokens, Utc::now()),
    ))
}

/// `POST /api/v1/auth/logout`: revoke the caller's refresh tokens.
pub async fn logout_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Envelope<()>> {
    state.service.logout(bearer_token(&headers)?).await?;
    Ok(Envelope::message(StatusCode::OK, "Logout successful"))
}

/// `GET /api/v1/auth/profile`: the caller's profile. Requires authentication.
pub async fn profile_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(claims)): Extension<AuthenticatedUser>,
) -> AppResult<Envelope<ProfileResponse>> {
    let user_id = claims
        .user_id()
        .ok_or_else(|| AppError::Unauthorized("Invalid or expired token".into()))?;
    let profile = state.service.get_profile(user_id).await?;
    Ok(Envelope::success(
        StatusCode::OK,
        "Profile retrieved",
        ProfileResponse::from(profile),
    ))
}
