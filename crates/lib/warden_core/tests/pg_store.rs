//! PostgreSQL store tests.
//!
//! Need a disposable database:
//!
//! ```sh
//! TEST_DATABASE_URL=postgres://localhost/warden_test cargo test -p warden_core -- --ignored
//! ```

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;
use warden_core::db::{DbSettings, connect_with_retry};
use warden_core::migrate::migrate;
use warden_core::models::auth::{NewAccount, NewIdentity, RefreshTokenRecord};
use warden_core::store::pg::PgStore;
use warden_core::store::{AccountStore, RefreshTokenStore, StoreError};
use warden_core::uuid::token_id;

async fn store() -> PgStore {
    let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
    let mut settings = DbSettings::new(url);
    settings.max_retries = 0;
    let pool = connect_with_retry(&settings).await.expect("connect");
    migrate(&pool).await.expect("migrate");
    PgStore::new(pool)
}

fn account() -> NewAccount {
    let id = Uuid::new_v4();
    let tag = id.simple().to_string();
    NewAccount {
        id,
        identity: NewIdentity {
            username: format!("u{}", &tag[..12]),
            email: format!("{tag}@example.com"),
            phone: "0123456789".into(),
            first_name: None,
            last_name: None,
        },
        password_hash: "hash".into(),
    }
}

fn record(user_id: Uuid) -> RefreshTokenRecord {
    RefreshTokenRecord::new(user_id, &token_id(), Utc::now() + Duration::days(1))
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn create_then_login_rotates() {
    let store = store().await;
    let acc = account();
    let user_id = acc.id;
    let email = acc.identity.email.clone();
    let first = record(user_id);

    let profile = store.create_account(acc, first.clone()).await.unwrap();
    assert_eq!(profile.id, user_id);
    let cred = store.find_credential(&email).await.unwrap().unwrap();
    assert_eq!(cred.user_id, user_id);

    let second = record(user_id);
    store
        .record_login(user_id, second.clone(), Utc::now())
        .await
        .unwrap();
    assert!(matches!(
        store.validate(&first.token_id).await,
        Err(StoreError::NotFound)
    ));
    assert_eq!(store.validate(&second.token_id).await.unwrap(), user_id);
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn duplicate_email_is_conflict() {
    let store = store().await;
    let acc = account();
    let mut dup = account();
    dup.identity.email = acc.identity.email.clone();
    let (a, d) = (acc.id, dup.id);

    store.create_account(acc, record(a)).await.unwrap();
    assert!(matches!(
        store.create_account(dup, record(d)).await,
        Err(StoreError::Conflict(_))
    ));
    assert!(store.find_profile(d).await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires TEST_DATABASE_URL"]
async fn exchange_is_single_use() {
    let store = store().await;
    let acc = account();
    let user_id = acc.id;
    let first = record(user_id);
    store.create_account(acc, first.clone()).await.unwrap();

    store.exchange(&first.token_id, record(user_id)).await.unwrap();
    assert!(matches!(
        store.exchange(&first.token_id, record(user_id)).await,
        Err(StoreError::NotFound)
    ));
    assert_eq!(store.revoke_all(user_id).await.unwrap(), 1);
    assert_eq!(store.revoke_all(user_id).await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore = "requires TEST_DATABASE_URL"]
async fn concurrent_rotations_leave_one_record() {
    let store = Arc::new(store().await);
    let acc = account();
    let user_id = acc.id;
    store.create_account(acc, record(user_id)).await.unwrap();

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.rotate(user_id, record(user_id)).await })
        })
        .collect();
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let live: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(store.pool())
            .await
            .unwrap();
    assert_eq!(live, 1);
}
