//! PostgreSQL-backed store.
//!
//! Multi-statement operations run in a `sqlx` transaction. The transaction
//! rolls back on drop, so an early `?` return, a panic, or a cancelled
//! request future all abandon the unit; only an explicit `commit` makes it
//! stick.
//!
//! Every operation that replaces a user's refresh records first locks the
//! user row (`FOR UPDATE`). Concurrent logins for one user therefore
//! serialise and always leave exactly one record behind. Locks are always
//! taken user row first, token rows second.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgConnection, PgPool};
use tracing::debug;
use uuid::Uuid;

use super::{AccountStore, RefreshTokenStore, StoreError, conflict_or_db};
use crate::models::auth::{Credential, NewAccount, Profile, RefreshTokenRecord};

const PROFILE_COLUMNS: &str =
    "id, username, email, phone, first_name, last_name, created_at, updated_at, last_login";

#[derive(Debug, FromRow)]
struct ProfileRow {
    id: Uuid,
    username: String,
    email: String,
    phone: String,
    first_name: Option<String>,
    last_name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login: DateTime<Utc>,
}

impl From<ProfileRow> for Profile {
    fn from(r: ProfileRow) -> Self {
        Profile {
            id: r.id,
            username: r.username,
            email: r.email,
            phone: r.phone,
            first_name: r.first_name,
            last_name: r.last_name,
            created_at: r.created_at,
            updated_at: r.updated_at,
            last_login: r.last_login,
        }
    }
}

/// Store over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Lock a live user row for the rest of the transaction.
async fn lock_user(conn: &mut PgConnection, user_id: Uuid) -> Result<(), StoreError> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM users WHERE id = $1 AND deleted_at IS NULL FOR UPDATE",
    )
    .bind(user_id)
    .fetch_optional(conn)
    .await?
    .map(|_| ())
    .ok_or(StoreError::NotFound)
}

/// Delete the user's refresh records and insert `record`.
async fn replace_sessions(
    conn: &mut PgConnection,
    record: &RefreshTokenRecord,
) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
        .bind(record.user_id)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "INSERT INTO refresh_tokens (id, user_id, token_id, expires_at, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $5)",
    )
    .bind(record.id)
    .bind(record.user_id)
    .bind(&record.token_id)
    .bind(record.expires_at)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await
    .map_err(conflict_or_db)?;
    Ok(())
}

#[async_trait]
impl AccountStore for PgStore {
    async fn find_credential(&self, email: &str) -> Result<Option<Credential>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, username, password_hash FROM users \
             WHERE email = $1 AND deleted_at IS NULL",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(user_id, username, password_hash)| Credential {
            user_id,
            username,
            password_hash,
        }))
    }

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "SELECT {PROFILE_COLUMNS} FROM users WHERE id = $1 AND deleted_at IS NULL"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Profile::from))
    }

    async fn create_account(
        &self,
        account: NewAccount,
        session: RefreshTokenRecord,
    ) -> Result<Profile, StoreError> {
        let mut tx = self.pool.begin().await?;

        let identity = &account.identity;
        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "INSERT INTO users (id, username, first_name, last_name, phone, email, password_hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(account.id)
        .bind(&identity.username)
        .bind(&identity.first_name)
        .bind(&identity.last_name)
        .bind(&identity.phone)
        .bind(&identity.email)
        .bind(&account.password_hash)
        .fetch_one(&mut *tx)
        .await
        .map_err(conflict_or_db)?;

        replace_sessions(&mut tx, &session).await?;

        tx.commit().await?;
        Ok(row.into())
    }

    async fn record_login(
        &self,
        user_id: Uuid,
        session: RefreshTokenRecord,
        at: DateTime<Utc>,
    ) -> Result<Profile, StoreError> {
        let mut tx = self.pool.begin().await?;

        lock_user(&mut tx, user_id).await?;
        replace_sessions(&mut tx, &session).await?;

        let row = sqlx::query_as::<_, ProfileRow>(&format!(
            "UPDATE users SET last_login = $2, updated_at = $2 WHERE id = $1 \
             RETURNING {PROFILE_COLUMNS}"
        ))
        .bind(user_id)
        .bind(at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row.into())
    }
}

#[async_trait]
impl RefreshTokenStore for PgStore {
    async fn rotate(&self, user_id: Uuid, mut record: RefreshTokenRecord) -> Result<(), StoreError> {
        record.user_id = user_id;
        let mut tx = self.pool.begin().await?;
        lock_user(&mut tx, user_id).await?;
        replace_sessions(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn validate(&self, token_id: &str) -> Result<Uuid, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, DateTime<Utc>)>(
            "SELECT user_id, expires_at FROM refresh_tokens WHERE token_id = $1",
        )
        .bind(token_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((user_id, expires_at)) if expires_at > Utc::now() => Ok(user_id),
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
        let mut tx = self.pool.begin().await?;

        lock_user(&mut tx, record.user_id).await?;

        // Consume the old record under the user lock; a concurrent exchange of
        // the same token finds nothing here.
        let consumed = sqlx::query(
            "DELETE FROM refresh_tokens \
             WHERE token_id = $1 AND user_id = $2 AND expires_at > $3",
        )
        .bind(old_token_id)
        .bind(record.user_id)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if consumed == 0 {
            return Err(StoreError::NotFound);
        }

        replace_sessions(&mut tx, &record).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn revoke_all(&self, user_id: Uuid) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
