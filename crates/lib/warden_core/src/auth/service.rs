//! Authentication service: register, login, refresh, logout, profile.
//!
//! Tokens are issued before anything is persisted, and the account plus its
//! first refresh record are written as one unit, so a failed registration
//! never leaves a user behind without usable tokens.
//!
//! Logout revokes refresh records only. An access token already handed out
//! stays valid until it expires; access lifetimes are kept short for that
//! reason.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AuthError;
use super::jwt::{TokenCodec, TokenError};
use super::password::{PasswordError, PasswordPolicy, hash_password};
use crate::config::AuthSettings;
use crate::models::auth::{
    NewAccount, NewIdentity, Profile, RefreshTokenRecord, Session, TokenClaims, TokenKind,
    TokenPair,
};
use crate::store::{AuthStore, StoreError};

const DUMMY_PASSWORD: &str = "warden-timing-equaliser";

/// Trim and lower-case an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing(msg) => AuthError::Internal(msg),
            _ => AuthError::Unauthenticated,
        }
    }
}

impl From<PasswordError> for AuthError {
    fn from(e: PasswordError) -> Self {
        match e {
            PasswordError::Mismatch => AuthError::InvalidCredentials,
            other => AuthError::Internal(other.to_string()),
        }
    }
}

/// Orchestrates the password policy, token codec and store.
pub struct AuthService {
    store: Arc<dyn AuthStore>,
    codec: TokenCodec,
    passwords: PasswordPolicy,
    /// Hash verified against when the email is unknown, at the live cost.
    dummy_hash: String,
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService")
            .field("codec", &self.codec)
            .field("passwords", &self.passwords)
            .finish_non_exhaustive()
    }
}

impl AuthService {
    pub fn new(
        store: Arc<dyn AuthStore>,
        codec: TokenCodec,
        passwords: PasswordPolicy,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hash_password(DUMMY_PASSWORD, passwords.cost())?;
        Ok(Self {
            store,
            codec,
            passwords,
            dummy_hash,
        })
    }

    /// Build from loaded settings.
    pub fn from_settings(
        store: Arc<dyn AuthStore>,
        settings: &AuthSettings,
    ) -> Result<Self, AuthError> {
        settings.validate()?;
        let passwords =
            PasswordPolicy::new(settings.password.cost, settings.password.rules.clone())?;
        Self::new(store, TokenCodec::new(settings.tokens.clone()), passwords)
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    /// Create an account and log it in.
    pub async fn register(
        &self,
        mut identity: NewIdentity,
        password: &str,
    ) -> Result<Session, AuthError> {
        identity.email = normalize_email(&identity.email);
        identity.username = identity.username.trim().to_string();
        self.passwords.validate_complexity(password)?;

        let password_hash = self.passwords.hash(password).await?;
        let user_id = Uuid::new_v4();
        let tokens = self.codec.issue_pair(user_id, &identity.username)?;
        let record = refresh_record(user_id, &tokens);

        let account = NewAccount {
            id: user_id,
            identity,
            password_hash,
        };
        let profile = self
            .store
            .create_account(account, record)
            .await
            .inspect_err(|e| warn!(error = %e, "registration not persisted"))?;

        info!(user_id = %profile.id, username = %profile.username, "user registered");
        Ok(Session { profile, tokens })
    }

    /// Exchange email + password for a session.
    ///
    /// Unknown email and wrong password both yield
    /// [`AuthError::InvalidCredentials`] after one bcrypt verification.
    /// Passwords longer than the policy maximum never match, since bcrypt
    /// would compare only their first 72 bytes.
    pub async fn login(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        if password.len() > self.passwords.rules().max_length {
            let _ = self.passwords.verify(&self.dummy_hash, password).await;
            debug!("login password exceeds maximum length");
            return Err(AuthError::InvalidCredentials);
        }

        let email = normalize_email(email);
        let Some(credential) = self.store.find_credential(&email).await? else {
            // Burn the same time a real verification would.
            let _ = self.passwords.verify(&self.dummy_hash, password).await;
            debug!("login for unknown email");
            return Err(AuthError::InvalidCredentials);
        };

        self.passwords
            .verify(&credential.password_hash, password)
            .await
            .inspect_err(|_| debug!(user_id = %credential.user_id, "login password mismatch"))?;

        let now = Utc::now();
        let tokens = self
            .codec
            .issue_pair_at(credential.user_id, &credential.username, now)?;
        let record = refresh_record(credential.user_id, &tokens);
        let profile = match self.store.record_login(credential.user_id, record, now).await {
            Ok(profile) => profile,
            // Deleted between lookup and write.
            Err(StoreError::NotFound) => return Err(AuthError::InvalidCredentials),
            Err(e) => return Err(e.into()),
        };

        info!(user_id = %profile.id, "user logged in");
        Ok(Session { profile, tokens })
    }

    /// Trade a refresh token for a new pair. The old token is consumed.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::Refresh)
            .inspect_err(|e| debug!(error = %e, "refresh token rejected"))?;
        let user_id = subject(&claims)?;

        let tokens = self.codec.issue_pair(user_id, &claims.username)?;
        match self
            .store
            .exchange(&claims.jti, refresh_record(user_id, &tokens))
            .await
        {
            Ok(()) => {
                debug!(user_id = %user_id, "refresh token exchanged");
                Ok(tokens)
            }
            Err(StoreError::NotFound) => {
                debug!(user_id = %user_id, jti = %claims.jti, "refresh record not live");
                Err(AuthError::Unauthenticated)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Verify an access token and return its claims.
    pub fn authenticate(&self, access_token: &str) -> Result<TokenClaims, AuthError> {
        let claims = self.codec.verify(access_token, TokenKind::Access)?;
        subject(&claims)?;
        Ok(claims)
    }

    /// Revoke every refresh record of the access token's subject.
    pub async fn logout(&self, access_token: &str) -> Result<(), AuthError> {
        let claims = self.authenticate(access_token)?;
        let user_id = subject(&claims)?;
        let revoked = self.store.revoke_all(user_id).await?;
        info!(user_id = %user_id, revoked, "user logged out");
        Ok(())
    }

    pub async fn get_profile(&self, user_id: Uuid) -> Result<Profile, AuthError> {
        self.store
            .find_profile(user_id)
            .await?
            .ok_or(AuthError::NotFound)
    }
}

fn subject(claims: &TokenClaims) -> Result<Uuid, AuthError> {
    claims.user_id().ok_or(AuthError::Unauthenticated)
}

fn refresh_record(user_id: Uuid, tokens: &TokenPair) -> RefreshTokenRecord {
    RefreshTokenRecord::new(user_id, &tokens.refresh_token_id, tokens.refresh_expires_at)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::auth::jwt::TokenConfig;
    use crate::auth::password::{PasswordRules, PasswordViolation};
    use crate::store::memory::MemoryStore;
    use crate::store::{AccountStore, RefreshTokenStore};

    const PASSWORD: &str = "Passw0rd!";

    fn token_config() -> TokenConfig {
        TokenConfig {
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            issuer: "warden-test".into(),
        }
    }

    fn service() -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let passwords = PasswordPolicy::new(4, PasswordRules::default()).unwrap();
        let svc = AuthService::new(store.clone(), TokenCodec::new(token_config()), passwords)
            .unwrap();
        (svc, store)
    }

    fn alice() -> NewIdentity {
        NewIdentity {
            username: "alice".into(),
            email: "alice@x.com".into(),
            phone: "0123456789".into(),
            first_name: Some("Alice".into()),
            last_name: None,
        }
    }

    #[tokio::test]
    async fn register_returns_tokens_and_persists_one_record() {
        let (svc, store) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();

        assert!(!session.tokens.access_token.is_empty());
        assert!(!session.tokens.refresh_token.is_empty());
        assert_ne!(session.tokens.access_token_id, session.tokens.refresh_token_id);
        assert_eq!(session.profile.email, "alice@x.com");

        let records = store.records_for(session.profile.id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].token_id, session.tokens.refresh_token_id);
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let (svc, store) = service();
        svc.register(alice(), PASSWORD).await.unwrap();

        let mut again = alice();
        again.username = "alice2".into();
        again.email = "  ALICE@x.com ".into();
        assert!(matches!(
            svc.register(again, PASSWORD).await,
            Err(AuthError::DuplicateIdentity)
        ));
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn weak_password_is_rejected_before_persisting() {
        let (svc, store) = service();
        assert!(matches!(
            svc.register(alice(), "password").await,
            Err(AuthError::WeakPassword(PasswordViolation::Uppercase(1)))
        ));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn failed_record_write_leaves_no_user() {
        let (svc, store) = service();
        store.fail_refresh_writes(true);
        assert!(matches!(
            svc.register(alice(), PASSWORD).await,
            Err(AuthError::Store(_))
        ));
        store.fail_refresh_writes(false);
        assert_eq!(store.user_count(), 0);
        assert_eq!(store.record_count(), 0);

        // The identity is still free.
        svc.register(alice(), PASSWORD).await.unwrap();
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let (svc, _) = service();
        svc.register(alice(), PASSWORD).await.unwrap();

        let wrong = svc.login("alice@x.com", "Wrong0rd!").await.unwrap_err();
        let unknown = svc.login("nobody@x.com", PASSWORD).await.unwrap_err();
        assert!(matches!(wrong, AuthError::InvalidCredentials));
        assert!(matches!(unknown, AuthError::InvalidCredentials));
        assert_eq!(wrong.to_string(), unknown.to_string());
    }

    #[tokio::test]
    async fn suffix_past_the_bcrypt_limit_does_not_log_in() {
        let (svc, _) = service();
        let long = format!("{PASSWORD}{}", "a".repeat(72 - PASSWORD.len()));
        assert_eq!(long.len(), 72);
        svc.register(alice(), &long).await.unwrap();

        assert!(matches!(
            svc.login("alice@x.com", &format!("{long}anything")).await,
            Err(AuthError::InvalidCredentials)
        ));
        svc.login("alice@x.com", &long).await.unwrap();
    }

    #[tokio::test]
    async fn login_rotates_the_refresh_record() {
        let (svc, store) = service();
        let first = svc.register(alice(), PASSWORD).await.unwrap();
        let second = svc.login(" Alice@X.com", PASSWORD).await.unwrap();

        let user_id = first.profile.id;
        assert_eq!(second.profile.id, user_id);
        assert!(second.profile.last_login >= first.profile.last_login);
        assert!(matches!(
            store.validate(&first.tokens.refresh_token_id).await,
            Err(StoreError::NotFound)
        ));
        assert_eq!(
            store.validate(&second.tokens.refresh_token_id).await.unwrap(),
            user_id
        );
        assert_eq!(store.records_for(user_id).len(), 1);
    }

    #[tokio::test]
    async fn failed_login_write_keeps_previous_session() {
        let (svc, store) = service();
        let first = svc.register(alice(), PASSWORD).await.unwrap();
        store.fail_refresh_writes(true);
        assert!(svc.login("alice@x.com", PASSWORD).await.is_err());
        store.fail_refresh_writes(false);
        assert!(store.validate(&first.tokens.refresh_token_id).await.is_ok());
    }

    #[tokio::test]
    async fn logout_revokes_refresh() {
        let (svc, store) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();

        svc.logout(&session.tokens.access_token).await.unwrap();
        assert!(matches!(
            store.validate(&session.tokens.refresh_token_id).await,
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            svc.refresh(&session.tokens.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
        // Idempotent.
        svc.logout(&session.tokens.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn logout_requires_an_access_token() {
        let (svc, _) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();
        assert!(matches!(
            svc.logout(&session.tokens.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
        assert!(matches!(
            svc.logout("garbage").await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn refresh_is_single_use() {
        let (svc, store) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();

        let next = svc.refresh(&session.tokens.refresh_token).await.unwrap();
        assert_ne!(next.refresh_token_id, session.tokens.refresh_token_id);
        assert!(matches!(
            svc.refresh(&session.tokens.refresh_token).await,
            Err(AuthError::Unauthenticated)
        ));
        assert_eq!(store.records_for(session.profile.id).len(), 1);
        svc.refresh(&next.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn refresh_rejects_access_tokens() {
        let (svc, _) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();
        assert!(matches!(
            svc.refresh(&session.tokens.access_token).await,
            Err(AuthError::Unauthenticated)
        ));
    }

    #[tokio::test]
    async fn profile_of_deleted_user_is_not_found() {
        let (svc, store) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();
        let user_id = session.profile.id;

        let profile = svc.get_profile(user_id).await.unwrap();
        assert_eq!(profile.username, "alice");

        store.soft_delete_user(user_id);
        assert!(matches!(
            svc.get_profile(user_id).await,
            Err(AuthError::NotFound)
        ));
        assert!(matches!(
            svc.login("alice@x.com", PASSWORD).await,
            Err(AuthError::InvalidCredentials)
        ));
        assert!(svc.authenticate(&session.tokens.access_token).is_ok());
    }

    #[tokio::test]
    async fn authenticate_returns_access_claims() {
        let (svc, _) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();
        let claims = svc.authenticate(&session.tokens.access_token).unwrap();
        assert_eq!(claims.user_id(), Some(session.profile.id));
        assert_eq!(claims.token_type, TokenKind::Access);
        assert_eq!(claims.jti, session.tokens.access_token_id);
    }

    #[tokio::test]
    async fn from_settings_rejects_bad_cost() {
        let mut settings = AuthSettings::with_secrets("a", "r");
        settings.password.cost = 2;
        let store: Arc<dyn AuthStore> = Arc::new(MemoryStore::new());
        assert!(matches!(
            AuthService::from_settings(store, &settings),
            Err(AuthError::Config(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_logins_leave_one_record() {
        let (svc, store) = service();
        let user_id = svc.register(alice(), PASSWORD).await.unwrap().profile.id;
        let svc = Arc::new(svc);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let svc = svc.clone();
                tokio::spawn(async move { svc.login("alice@x.com", PASSWORD).await })
            })
            .collect();
        let mut last = Vec::new();
        for h in handles {
            last.push(h.await.unwrap().unwrap().tokens.refresh_token_id);
        }

        let records = store.records_for(user_id);
        assert_eq!(records.len(), 1);
        assert!(last.contains(&records[0].token_id));
    }

    #[tokio::test]
    async fn store_is_usable_through_the_trait_object() {
        let (svc, _) = service();
        let session = svc.register(alice(), PASSWORD).await.unwrap();
        let found = svc
            .store()
            .find_credential("alice@x.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.user_id, session.profile.id);
    }
}
