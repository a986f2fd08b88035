//! Per-client rate limiting for the public auth endpoints.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use crate::AppState;
use crate::error::AppError;

/// Identify the client by its socket peer, else `"unknown"`.
///
/// With `trust_proxy`, the first `X-Forwarded-For` hop and then `X-Real-IP`
/// take precedence over the peer.
pub fn client_key(request: &Request, trust_proxy: bool) -> String {
    if trust_proxy && let Some(forwarded) = proxy_client(request) {
        return forwarded.to_string();
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn proxy_client(request: &Request) -> Option<&str> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    header("x-forwarded-for")
        .and_then(|forwarded| forwarded.split(',').map(str::trim).find(|h| !h.is_empty()))
        .or_else(|| header("x-real-ip"))
}

/// Reject with `429` once the client has used up its window.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let settings = &state.config.rate_limit;
    if !settings.enabled {
        return Ok(next.run(request).await);
    }

    let key = client_key(&request, settings.trust_proxy);
    let limit = settings.limit;
    if !state.limiter.allow(&key, limit.requests, limit.window) {
        warn!(client = %key, path = %request.uri().path(), "rate limit exceeded");
        return Err(AppError::RateLimited);
    }

    Ok(next.run(request).await)
}
