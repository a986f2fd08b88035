//! In-memory store.
//!
//! All state sits behind one mutex, so every trait method is trivially
//! atomic. Used by tests and for running the API without PostgreSQL.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use super::{AccountStore, RefreshTokenStore, StoreError};
use crate::models::auth::{Credential, NewAccount, Profile, RefreshTokenRecord};

#[derive(Debug, Clone)]
struct UserRow {
    profile: Profile,
    password_hash: String,
    deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct State {
    users: HashMap<Uuid, UserRow>,
    /// Keyed by `token_id`.
    refresh_tokens: HashMap<String, RefreshTokenRecord>,
}

impl State {
    fn live_user(&self, user_id: Uuid) -> Option<&UserRow> {
        self.users.get(&user_id).filter(|u| u.deleted_at.is_none())
    }

    fn replace_sessions(&mut self, record: RefreshTokenRecord) -> Result<(), StoreError> {
        if self.refresh_tokens.contains_key(&record.token_id) {
            return Err(StoreError::Conflict("refresh_tokens_token_id_key".into()));
        }
        self.refresh_tokens.retain(|_, r| r.user_id != record.user_id);
        self.refresh_tokens.insert(record.token_id.clone(), record);
        Ok(())
    }
}

/// Mutex-guarded store for tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    fail_refresh_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // A poisoned lock only means a test panicked mid-write; the maps are still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_refresh_writes(&self) -> Result<(), StoreError> {
        if self.fail_refresh_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("refresh token write failed".into()));
        }
        Ok(())
    }

    /// Make every subsequent refresh-record insert fail, for rollback tests.
    pub fn fail_refresh_writes(&self, fail: bool) {
        self.fail_refresh_writes.store(fail, Ordering::SeqCst);
    }

    /// Soft-delete a user.
    pub fn soft_delete_user(&self, user_id: Uuid) {
        if let Some(user) = self.state().users.get_mut(&user_id) {
            user.deleted_at = Some(Utc::now());
        }
    }

    /// Hard-delete a user; refresh records go with it.
    pub fn delete_user(&self, user_id: Uuid) {
        let mut state = self.state();
        state.users.remove(&user_id);
        state.refresh_tokens.retain(|_, r| r.user_id != user_id);
    }

    /// Total refresh records held.
    pub fn record_count(&self) -> usize {
        self.state().refresh_tokens.len()
    }

    /// Refresh records held for one user.
    pub fn records_for(&self, user_id: Uuid) -> Vec<RefreshTokenRecord> {
        self.state()
            .refresh_tokens
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.state().users.len()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn find_credential(&self, email: &str) -> Result<Option<Credential>, StoreError> {
        let state = self.state();
        Ok(state
            .users
            .values()
            .find(|u| u.deleted_at.is_none() && u.profile.email == email)
            .map(|u| Credential {
                user_id: u.profile.id,
                username: u.profile.username.clone(),
                password_hash: u.password_hash.clone(),
            }))
    }

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.state().live_user(user_id).map(|u| u.profile.clone()))
    }

    async fn create_account(
        &self,
        account: NewAccount,
        session: RefreshTokenRecord,
    ) -> Result<Profile, StoreError> {
        let mut state = self.state();
        let identity = &account.identity;
        if state.users.values().any(|u| u.profile.email == identity.email) {
            return Err(StoreError::Conflict("users_email_key".into()));
        }
        if state.users.values().any(|u| u.profile.username == identity.username) {
            return Err(StoreError::Conflict("users_username_key".into()));
        }
        // Fail before touching anything so a failed write leaves no user behind.
        self.check_refresh_writes()?;

        let now = Utc::now();
        let profile = Profile {
            id: account.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            phone: identity.phone.clone(),
            first_name: identity.first_name.clone(),
            last_name: identity.last_name.clone(),
            created_at: now,
            updated_at: now,
            last_login: now,
        };
        state.users.insert(
            account.id,
            UserRow {
                profile: profile.clone(),
                password_hash: account.password_hash,
                deleted_at: None,
            },
        );
        state.replace_sessions(session)?;
        Ok(profile)
    }

    async fn record_login(
        &self,
        user_id: Uuid,
        session: RefreshTokenRecord,
        at: DateTime<Utc>,
    ) -> Result<Profile, StoreError> {
        self.check_refresh_writes()?;
        let mut state = self.state();
        if state.live_user(user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        state.replace_sessions(session)?;
        let user = state.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.profile.last_login = at;
        user.profile.updated_at = at;
        Ok(user.profile.clone())
    }
}

#[async_trait]
impl RefreshTokenStore for MemoryStore {
    async fn rotate(&self, user_id: Uuid, mut record: RefreshTokenRecord) -> Result<(), StoreError> {
        self.check_refresh_writes()?;
        let mut state = self.state();
        if state.live_user(user_id).is_none() {
            return Err(StoreError::NotFound);
        }
        record.user_id = user_id;
        state.replace_sessions(record)
    }

    async fn validate(&self, token_id: &str) -> Result<Uuid, StoreError> {
        let state = self.state();
        match state.refresh_tokens.get(token_id) {
            Some(r) if r.is_live_at(Utc::now()) => Ok(r.user_id),
            Some(_) => {
                debug!(token_id, "refresh token record expired");
                Err(StoreError::NotFound)
            }
            None => Err(StoreError::NotFound),
        }
    }

    async fn exchange(
        &self,
        old_token_id: &str,
        record: RefreshTokenRecord,
    ) -> Result<(), StoreError> {
        self.check_refresh_writes()?;
        let mut state = self.state();
        let owner = match state.refresh_tokens.get(old_token_id) {
            Some(r) if r.is_live_at(Utc::now()) => r.user_id,
            _ => return Err(StoreError::NotFound),
        };
        if owner != record.user_id || state.live_user(owner).is_none() {
            return Err(StoreError::NotFound);
        }
        state.replace_sessions(record)
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let mut state = self.state();
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, r| r.user_id != user_id);
        Ok((before - state.refresh_tokens.len()) as u64)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state();
        let before = state.refresh_tokens.len();
        state.refresh_tokens.retain(|_, r| r.expires_at >= now);
        Ok((before - state.refresh_tokens.len()) as u64)
    }
}
