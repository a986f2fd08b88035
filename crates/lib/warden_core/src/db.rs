//! PostgreSQL pool bootstrap.
//!
//! Builds the pool with bounded acquire and statement timeouts, pings it,
//! and retries with a linear backoff while the database comes up.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while opening the pool.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    #[error("Database did not answer within {0:?}")]
    PingTimeout(Duration),

    #[error("Database unavailable after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DbError>;

/// Pool settings.
#[derive(Debug, Clone)]
pub struct DbSettings {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    /// Server-side `statement_timeout` for every pooled connection.
    pub statement_timeout: Duration,
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n × retry_step` before the next try.
    pub retry_step: Duration,
}

impl DbSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout: Duration::from_millis(5000),
            max_retries: 5,
            retry_step: Duration::from_secs(1),
        }
    }

    fn connect_options(&self) -> Result<PgConnectOptions> {
        let options = PgConnectOptions::from_str(&self.url)
            .map_err(|e| DbError::InvalidUrl(e.to_string()))?;
        Ok(options.options([(
            "statement_timeout",
            self.statement_timeout.as_millis().to_string(),
        )]))
    }
}

/// Open the pool once and confirm it answers.
pub async fn connect(settings: &DbSettings) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(settings.max_connections)
        .acquire_timeout(settings.acquire_timeout)
        .connect_with(settings.connect_options()?)
        .await?;
    ping(&pool, settings.acquire_timeout).await?;
    Ok(pool)
}

/// `SELECT 1` under `limit`.
pub async fn ping(pool: &PgPool, limit: Duration) -> Result<()> {
    tokio::time::timeout(limit, sqlx::query("SELECT 1").execute(pool))
        .await
        .map_err(|_| DbError::PingTimeout(limit))??;
    Ok(())
}

/// [`connect`] with up to `max_retries` further attempts.
///
/// A malformed URL fails immediately.
pub async fn connect_with_retry(settings: &DbSettings) -> Result<PgPool> {
    let attempts = settings.max_retries.saturating_add(1);
    let mut last = String::new();
    for attempt in 1..=attempts {
        match connect(settings).await {
            Ok(pool) => {
                info!(attempt, "database connected");
                return Ok(pool);
            }
            Err(e @ DbError::InvalidUrl(_)) => return Err(e),
            Err(e) => {
                last = e.to_string();
                if attempt < attempts {
                    let wait = settings.retry_step * attempt;
                    warn!(attempt, error = %e, wait_ms = wait.as_millis() as u64, "database not ready, retrying");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }
    Err(DbError::Exhausted { attempts, last })
}
