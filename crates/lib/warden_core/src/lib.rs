//! # warden_core
//!
//! Core authentication logic for Warden: password policy, token codec,
//! refresh-token persistence, rate limiting, and the auth service that
//! composes them.

pub mod auth;
pub mod config;
pub mod db;
pub mod migrate;
pub mod models;
pub mod rate_limit;
pub mod store;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
