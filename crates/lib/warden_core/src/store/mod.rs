//! Persistence seams for accounts and refresh-token records.
//!
//! [`AccountStore`] and [`RefreshTokenStore`] are implemented by
//! [`pg::PgStore`] for production and [`memory::MemoryStore`] for tests and
//! local runs. Components receive an `Arc<dyn AuthStore>` at construction;
//! nothing reaches for a global handle.
//!
//! Every method that mutates more than one row is a single atomic unit in
//! both implementations.

pub mod memory;
pub mod pg;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::auth::{Credential, NewAccount, Profile, RefreshTokenRecord};

/// Store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Map a unique-constraint violation to `Conflict`, anything else to `Db`.
pub(crate) fn conflict_or_db(e: sqlx::Error) -> StoreError {
    if let Some(db) = e.as_database_error()
        && db.is_unique_violation()
    {
        return StoreError::Conflict(db.constraint().unwrap_or("unique").to_string());
    }
    StoreError::Db(e)
}

/// User-account persistence.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Look up the credential for an (already normalised) email.
    /// Soft-deleted accounts are invisible.
    async fn find_credential(&self, email: &str) -> Result<Option<Credential>, StoreError>;

    /// Fetch a live user's profile.
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Insert the account and its first refresh record in one unit.
    /// Duplicate email or username is `Conflict`; nothing is written then.
    async fn create_account(
        &self,
        account: NewAccount,
        session: RefreshTokenRecord,
    ) -> Result<Profile, StoreError>;

    /// Rotate the user's refresh record and stamp `last_login`, in one unit.
    async fn record_login(
        &self,
        user_id: Uuid,
        session: RefreshTokenRecord,
        at: DateTime<Utc>,
    ) -> Result<Profile, StoreError>;
}

/// Server-side refresh-token records. At most one per user.
#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Delete every record for `user_id`, then insert `record`. All or nothing.
    async fn rotate(&self, user_id: Uuid, record: RefreshTokenRecord) -> Result<(), StoreError>;

    /// Resolve a live record to its user. Absent and expired are both `NotFound`.
    async fn validate(&self, token_id: &str) -> Result<Uuid, StoreError>;

    /// Consume the live record `old_token_id` and replace the owner's records
    /// with `record`, in one unit. `NotFound` if the old record is not live or
    /// belongs to someone other than `record.user_id`.
    async fn exchange(
        &self,
        old_token_id: &str,
        record: RefreshTokenRecord,
    ) -> Result<(), StoreError>;

    /// Delete every record for `user_id`. Returns how many went; zero is fine.
    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, StoreError>;

    /// Delete every record with `expires_at < now`. Returns how many went.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Both stores behind one handle.
pub trait AuthStore: AccountStore + RefreshTokenStore {}

impl<T: AccountStore + RefreshTokenStore> AuthStore for T {}

/// Spawn a periodic expired-record sweep that stops when `shutdown` fires.
pub fn spawn_expiry_sweep(
    store: Arc<dyn AuthStore>,
    every: Duration,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            match store.sweep_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(n) => info!(removed = n, "swept expired refresh tokens"),
                Err(e) => warn!(error = %e, "refresh token sweep failed"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;

    use super::*;
    use crate::models::auth::NewIdentity;

    #[tokio::test(start_paused = true)]
    async fn sweep_task_removes_expired_records_and_stops() {
        let store = Arc::new(memory::MemoryStore::new());
        let user_id = Uuid::new_v4();
        let account = NewAccount {
            id: user_id,
            identity: NewIdentity {
                username: "alice".into(),
                email: "alice@x.com".into(),
                phone: "0123456789".into(),
                first_name: None,
                last_name: None,
            },
            password_hash: "hash".into(),
        };
        let expired = RefreshTokenRecord::new(user_id, "old", Utc::now() - ChronoDuration::seconds(1));
        store.create_account(account, expired).await.unwrap();

        let shutdown = CancellationToken::new();
        let handle = spawn_expiry_sweep(store.clone(), Duration::from_secs(60), shutdown.clone());

        // First tick fires immediately.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.record_count(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
