//! Settings consumed by the auth core.
//!
//! | Variable                  | Default      |
//! |---------------------------|--------------|
//! | `ACCESS_TOKEN_SECRET`     | required (`JWT_SECRET` accepted) |
//! | `REFRESH_TOKEN_SECRET`    | required     |
//! | `ACCESS_TOKEN_TTL_SECS`   | `900`        |
//! | `REFRESH_TOKEN_TTL_SECS`  | `604800`     |
//! | `JWT_ISSUER`              | `warden`     |
//! | `BCRYPT_COST`             | `12`         |
//! | `PASSWORD_MIN_LENGTH`     | `8`          |
//! | `PASSWORD_MAX_LENGTH`     | `72`         |
//! | `PASSWORD_MIN_UPPERCASE`  | `1`          |
//! | `PASSWORD_MIN_LOWERCASE`  | `1`          |
//! | `PASSWORD_MIN_DIGITS`     | `1`          |
//! | `PASSWORD_MIN_SPECIAL`    | `1`          |
//! | `RATE_LIMIT_ENABLED`      | `true`       |
//! | `RATE_LIMIT_REQUESTS`     | `100`        |
//! | `RATE_LIMIT_WINDOW_SECS`  | `60`         |
//! | `RATE_LIMIT_SWEEP_SECS`   | `60`         |
//! | `RATE_LIMIT_TRUST_PROXY`  | `false`      |
//! | `REFRESH_SWEEP_SECS`      | `3600`       |

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::auth::jwt::TokenConfig;
use crate::auth::password::{DEFAULT_COST, MAX_COST, MIN_COST, PasswordRules};
use crate::rate_limit::RateLimit;

/// Configuration errors. Fatal at startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{key}: cannot parse {value:?}")]
    Parse { key: &'static str, value: String },

    #[error("{key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Password hashing cost + composition rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordSettings {
    pub cost: u32,
    pub rules: PasswordRules,
}

impl Default for PasswordSettings {
    fn default() -> Self {
        Self {
            cost: DEFAULT_COST,
            rules: PasswordRules::default(),
        }
    }
}

/// Rate limiting of the public endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitSettings {
    pub enabled: bool,
    pub limit: RateLimit,
    pub sweep_every: Duration,
    /// Key clients by `X-Forwarded-For` / `X-Real-IP` instead of the socket
    /// peer. Only safe behind a proxy that overwrites those headers.
    pub trust_proxy: bool,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: RateLimit::default(),
            sweep_every: Duration::from_secs(60),
            trust_proxy: false,
        }
    }
}

/// Everything the auth core needs.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub tokens: TokenConfig,
    pub password: PasswordSettings,
    pub rate_limit: RateLimitSettings,
    pub refresh_sweep_every: Duration,
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| ConfigError::Parse { key, value: v }),
    }
}

fn parse_bool(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match lookup(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v.is_empty() => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Parse { key, value: v }),
        },
    }
}

fn secret(
    lookup: &impl Fn(&str) -> Option<String>,
    keys: &[&'static str],
) -> Result<String, ConfigError> {
    keys.iter()
        .filter_map(|k| lookup(k))
        .find(|v| !v.is_empty())
        .ok_or(ConfigError::Missing(keys[0]))
}

impl AuthSettings {
    /// Defaults everywhere except the two signing secrets.
    pub fn with_secrets(access_secret: &str, refresh_secret: &str) -> Self {
        Self {
            tokens: TokenConfig {
                access_secret: access_secret.to_string(),
                refresh_secret: refresh_secret.to_string(),
                access_ttl: chrono::Duration::seconds(900),
                refresh_ttl: chrono::Duration::seconds(604_800),
                issuer: "warden".to_string(),
            },
            password: PasswordSettings::default(),
            rate_limit: RateLimitSettings::default(),
            refresh_sweep_every: Duration::from_secs(3600),
        }
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup` and validate them.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let access_secret = secret(&lookup, &["ACCESS_TOKEN_SECRET", "JWT_SECRET"])?;
        let refresh_secret = secret(&lookup, &["REFRESH_TOKEN_SECRET"])?;
        let mut settings = Self::with_secrets(&access_secret, &refresh_secret);

        settings.tokens.access_ttl =
            chrono::Duration::seconds(parse(&lookup, "ACCESS_TOKEN_TTL_SECS", 900i64)?);
        settings.tokens.refresh_ttl =
            chrono::Duration::seconds(parse(&lookup, "REFRESH_TOKEN_TTL_SECS", 604_800i64)?);
        settings.tokens.issuer = parse(&lookup, "JWT_ISSUER", "warden".to_string())?;

        let defaults = PasswordRules::default();
        settings.password = PasswordSettings {
            cost: parse(&lookup, "BCRYPT_COST", DEFAULT_COST)?,
            rules: PasswordRules {
                min_length: parse(&lookup, "PASSWORD_MIN_LENGTH", defaults.min_length)?,
                max_length: parse(&lookup, "PASSWORD_MAX_LENGTH", defaults.max_length)?,
                min_uppercase: parse(&lookup, "PASSWORD_MIN_UPPERCASE", defaults.min_uppercase)?,
                min_lowercase: parse(&lookup, "PASSWORD_MIN_LOWERCASE", defaults.min_lowercase)?,
                min_digits: parse(&lookup, "PASSWORD_MIN_DIGITS", defaults.min_digits)?,
                min_special: parse(&lookup, "PASSWORD_MIN_SPECIAL", defaults.min_special)?,
            },
        };

        settings.rate_limit = RateLimitSettings {
            enabled: parse_bool(&lookup, "RATE_LIMIT_ENABLED", true)?,
            limit: RateLimit {
                requests: parse(&lookup, "RATE_LIMIT_REQUESTS", 100u32)?,
                window: Duration::from_secs(parse(&lookup, "RATE_LIMIT_WINDOW_SECS", 60u64)?),
            },
            sweep_every: Duration::from_secs(parse(&lookup, "RATE_LIMIT_SWEEP_SECS", 60u64)?),
            trust_proxy: parse_bool(&lookup, "RATE_LIMIT_TRUST_PROXY", false)?,
        };
        settings.refresh_sweep_every =
            Duration::from_secs(parse(&lookup, "REFRESH_SWEEP_SECS", 3600u64)?);

        settings.validate()?;
        Ok(settings)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tokens.access_secret.is_empty() {
            return Err(ConfigError::Missing("ACCESS_TOKEN_SECRET"));
        }
        if self.tokens.refresh_secret.is_empty() {
            return Err(ConfigError::Missing("REFRESH_TOKEN_SECRET"));
        }
        if self.tokens.access_ttl <= chrono::Duration::zero() {
            return Err(ConfigError::Invalid {
                key: "ACCESS_TOKEN_TTL_SECS",
                reason: "must be greater than 0".into(),
            });
        }
        if self.tokens.refresh_ttl <= self.tokens.access_ttl {
            return Err(ConfigError::Invalid {
                key: "REFRESH_TOKEN_TTL_SECS",
                reason: "must exceed the access token TTL".into(),
            });
        }
        if !(MIN_COST..=MAX_COST).contains(&self.password.cost) {
            return Err(ConfigError::Invalid {
                key: "BCRYPT_COST",
                reason: format!("must be within {MIN_COST}..={MAX_COST}"),
            });
        }
        let rules = &self.password.rules;
        if rules.min_length > rules.max_length {
            return Err(ConfigError::Invalid {
                key: "PASSWORD_MIN_LENGTH",
                reason: "must not exceed PASSWORD_MAX_LENGTH".into(),
            });
        }
        if rules.max_length > 72 {
            return Err(ConfigError::Invalid {
                key: "PASSWORD_MAX_LENGTH",
                reason: "bcrypt only reads 72 bytes".into(),
            });
        }
        if self.rate_limit.enabled {
            if self.rate_limit.limit.requests == 0 {
                return Err(ConfigError::Invalid {
                    key: "RATE_LIMIT_REQUESTS",
                    reason: "must be greater than 0".into(),
                });
            }
            if self.rate_limit.limit.window.is_zero() {
                return Err(ConfigError::Invalid {
                    key: "RATE_LIMIT_WINDOW_SECS",
                    reason: "must be greater than 0".into(),
                });
            }
        }
        if self.rate_limit.sweep_every.is_zero() || self.refresh_sweep_every.is_zero() {
            return Err(ConfigError::Invalid {
                key: "REFRESH_SWEEP_SECS",
                reason: "sweep intervals must be greater than 0".into(),
            });
        }
        Ok(())
    }
}
