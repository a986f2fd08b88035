//! Authentication domain models.
//!
//! These are internal domain models, distinct from the API request/response
//! types in `warden_api` (which shape the JSON envelope).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored credential for a user: identity plus bcrypt hash.
#[derive(Debug, Clone)]
pub struct Credential {
    pub user_id: Uuid,
    pub username: String,
    pub password_hash: String,
}

/// Public profile of a user account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Identity supplied at registration, before hashing.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub phone: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

/// A fully prepared account row, ready to insert.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: Uuid,
    pub identity: NewIdentity,
    pub password_hash: String,
}

/// Refresh token record stored in the database.
///
/// At most one record exists per user at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_id: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    /// Build the server-side record for a freshly issued refresh token.
    pub fn new(user_id: Uuid, token_id: &str, expires_at: DateTime<Utc>) -> Self {
        Self {
            id: crate::uuid::uuidv7(),
            user_id,
            token_id: token_id.to_string(),
            expires_at,
            created_at: Utc::now(),
        }
    }

    /// Whether the record is still usable at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Discriminator embedded in every token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenKind::Access => "access",
            TokenKind::Refresh => "refresh",
        }
    }
}

impl std::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TokenKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            _ => Err(()),
        }
    }
}

/// Verified JWT claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    /// Subject, the user ID (standard JWT `sub` claim).
    pub sub: String,
    /// Username of the subject.
    pub username: String,
    /// `access` or `refresh`.
    pub token_type: TokenKind,
    /// Unique token identifier.
    pub jti: String,
    /// Issuer.
    pub iss: String,
    /// Issued at (unix timestamp).
    pub iat: i64,
    /// Not before (unix timestamp).
    pub nbf: i64,
    /// Expiry (unix timestamp).
    pub exp: i64,
}

impl TokenClaims {
    /// Parse the subject as a user id.
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

/// Access + refresh token pair produced by one authentication event.
#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_token_id: String,
    pub refresh_token_id: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

/// Result of a successful login, registration or refresh.
#[derive(Debug, Clone)]
pub struct Session {
    pub profile: Profile,
    pub tokens: TokenPair,
}
