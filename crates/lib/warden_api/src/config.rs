//! API server configuration.

use std::time::Duration;

use warden_core::config::{AuthSettings, RateLimitSettings};

/// Configuration for the HTTP layer.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Requests running longer than this get `408`.
    pub request_timeout: Duration,
    /// Limit applied to register, login and refresh.
    pub rate_limit: RateLimitSettings,
}

impl ApiConfig {
    pub fn new(settings: &AuthSettings, request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            rate_limit: settings.rate_limit.clone(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(15),
            rate_limit: RateLimitSettings::default(),
        }
    }
}
