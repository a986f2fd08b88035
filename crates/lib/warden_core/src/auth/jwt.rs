//! JWT token generation and verification.
//!
//! Every authentication event yields an access/refresh pair. Each token is
//! HS256-signed with the secret for its kind, carries its kind in the
//! `token_type` claim and a fresh UUIDv7 `jti`.
//!
//! Time-based checks (`exp`, `nbf`) are done here against a caller-supplied
//! `now` rather than inside `jsonwebtoken`, which keeps [`decode_token`] a
//! pure function of its inputs.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::auth::{TokenClaims, TokenKind, TokenPair};
use crate::uuid::token_id;

/// Token verification / signing failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,

    #[error("token signature or signing method mismatch")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(&'static str),

    #[error("token signing failed: {0}")]
    Signing(String),
}

/// Signing material and lifetimes for both token kinds.
#[derive(Clone)]
pub struct TokenConfig {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub issuer: String,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("access_secret", &"<redacted>")
            .field("refresh_secret", &"<redacted>")
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .field("issuer", &self.issuer)
            .finish()
    }
}

/// Claims as they appear on the wire, before presence checks.
#[derive(Debug, Deserialize)]
struct RawClaims {
    sub: Option<String>,
    username: Option<String>,
    token_type: Option<String>,
    jti: Option<String>,
    iss: Option<String>,
    iat: Option<i64>,
    nbf: Option<i64>,
    exp: Option<i64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn classify(err: jsonwebtoken::errors::Error) -> TokenError {
    match err.kind() {
        ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
            TokenError::Malformed
        }
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
            TokenError::BadSignature
        }
        ErrorKind::ExpiredSignature => TokenError::Expired,
        _ => TokenError::Invalid("rejected by decoder"),
    }
}

/// Verify a token's signature and claims at `now`.
///
/// Does not look at `token_type` beyond requiring a known kind; callers that
/// need a specific kind use [`TokenCodec::verify`].
pub fn decode_token(
    token: &str,
    secret: &[u8],
    issuer: &str,
    now: DateTime<Utc>,
) -> Result<TokenClaims, TokenError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let raw = decode::<RawClaims>(token, &DecodingKey::from_secret(secret), &validation)
        .map_err(classify)?
        .claims;

    let now = now.timestamp();
    let exp = raw.exp.ok_or(TokenError::Invalid("missing exp"))?;
    if now > exp {
        return Err(TokenError::Expired);
    }
    let nbf = raw.nbf.ok_or(TokenError::Invalid("missing nbf"))?;
    if nbf > now {
        return Err(TokenError::Invalid("token not yet valid"));
    }
    let iss = non_empty(raw.iss).ok_or(TokenError::Invalid("missing iss"))?;
    if iss != issuer {
        return Err(TokenError::Invalid("unexpected issuer"));
    }
    let sub = non_empty(raw.sub).ok_or(TokenError::Invalid("missing sub"))?;
    let jti = non_empty(raw.jti).ok_or(TokenError::Invalid("missing jti"))?;
    let token_type = non_empty(raw.token_type)
        .ok_or(TokenError::Invalid("missing token_type"))?
        .parse::<TokenKind>()
        .map_err(|_| TokenError::Invalid("unknown token_type"))?;

    Ok(TokenClaims {
        sub,
        username: raw.username.unwrap_or_default(),
        token_type,
        jti,
        iss,
        iat: raw.iat.unwrap_or(nbf),
        nbf,
        exp,
    })
}

/// Issues and verifies typed token pairs.
#[derive(Debug, Clone)]
pub struct TokenCodec {
    config: TokenConfig,
}

impl TokenCodec {
    pub fn new(config: TokenConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.config
    }

    fn secret(&self, kind: TokenKind) -> &[u8] {
        match kind {
            TokenKind::Access => self.config.access_secret.as_bytes(),
            TokenKind::Refresh => self.config.refresh_secret.as_bytes(),
        }
    }

    fn ttl(&self, kind: TokenKind) -> Duration {
        match kind {
            TokenKind::Access => self.config.access_ttl,
            TokenKind::Refresh => self.config.refresh_ttl,
        }
    }

    fn encode_at(
        &self,
        kind: TokenKind,
        user_id: Uuid,
        username: &str,
        jti: &str,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let claims = TokenClaims {
            sub: user_id.to_string(),
            username: username.to_string(),
            token_type: kind,
            jti: jti.to_string(),
            iss: self.config.issuer.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret(kind)),
        )
        .map_err(|e| TokenError::Signing(format!("jwt encode: {e}")))
    }

    /// Issue a fresh access/refresh pair for a subject.
    pub fn issue_pair(&self, user_id: Uuid, username: &str) -> Result<TokenPair, TokenError> {
        self.issue_pair_at(user_id, username, Utc::now())
    }

    /// Issue a pair as if the current time were `now`.
    pub fn issue_pair_at(
        &self,
        user_id: Uuid,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let access_token_id = token_id();
        let refresh_token_id = token_id();
        let access_expires_at = now + self.ttl(TokenKind::Access);
        let refresh_expires_at = now + self.ttl(TokenKind::Refresh);

        let access_token = self.encode_at(
            TokenKind::Access,
            user_id,
            username,
            &access_token_id,
            now,
            access_expires_at,
        )?;
        let refresh_token = self.encode_at(
            TokenKind::Refresh,
            user_id,
            username,
            &refresh_token_id,
            now,
            refresh_expires_at,
        )?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            access_token_id,
            refresh_token_id,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Verify a token that must be of `kind`.
    pub fn verify(&self, token: &str, kind: TokenKind) -> Result<TokenClaims, TokenError> {
        self.verify_at(token, kind, Utc::now())
    }

    /// Verify a token that must be of `kind`, as of `now`.
    pub fn verify_at(
        &self,
        token: &str,
        kind: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenError> {
        let claims = decode_token(token, self.secret(kind), &self.config.issuer, now)?;
        if claims.token_type != kind {
            return Err(TokenError::Invalid("token kind mismatch"));
        }
        Ok(claims)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn config() -> TokenConfig {
        TokenConfig {
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            access_ttl: Duration::minutes(15),
            refresh_ttl: Duration::days(7),
            issuer: "warden-test".into(),
        }
    }

    fn codec() -> TokenCodec {
        TokenCodec::new(config())
    }

    fn forge(claims: serde_json::Value, secret: &str, alg: Algorithm) -> String {
        encode(
            &Header::new(alg),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn valid_claims() -> serde_json::Value {
        let now = Utc::now().timestamp();
        json!({
            "sub": Uuid::new_v4().to_string(),
            "username": "alice",
            "token_type": "access",
            "jti": "abc123",
            "iss": "warden-test",
            "iat": now,
            "nbf": now,
            "exp": now + 60,
        })
    }

    #[test]
    fn issued_pair_verifies_with_matching_kinds() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let pair = codec.issue_pair(user_id, "alice").unwrap();

        let access = codec.verify(&pair.access_token, TokenKind::Access).unwrap();
        assert_eq!(access.token_type, TokenKind::Access);
        assert_eq!(access.user_id(), Some(user_id));
        assert_eq!(access.username, "alice");
        assert_eq!(access.jti, pair.access_token_id);
        assert_eq!(access.iss, "warden-test");

        let refresh = codec.verify(&pair.refresh_token, TokenKind::Refresh).unwrap();
        assert_eq!(refresh.token_type, TokenKind::Refresh);
        assert_eq!(refresh.jti, pair.refresh_token_id);
        assert!(pair.refresh_expires_at > pair.access_expires_at);
    }

    #[test]
    fn cross_use_is_rejected() {
        let codec = codec();
        let pair = codec.issue_pair(Uuid::new_v4(), "alice").unwrap();
        assert_eq!(
            codec.verify(&pair.access_token, TokenKind::Refresh),
            Err(TokenError::BadSignature)
        );
        assert_eq!(
            codec.verify(&pair.refresh_token, TokenKind::Access),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn cross_use_is_rejected_with_shared_secret() {
        let codec = TokenCodec::new(TokenConfig {
            refresh_secret: "access-secret".into(),
            ..config()
        });
        let pair = codec.issue_pair(Uuid::new_v4(), "alice").unwrap();
        assert_eq!(
            codec.verify(&pair.access_token, TokenKind::Refresh),
            Err(TokenError::Invalid("token kind mismatch"))
        );
    }

    #[test]
    fn each_issuance_gets_fresh_ids() {
        let codec = codec();
        let user_id = Uuid::new_v4();
        let a = codec.issue_pair(user_id, "alice").unwrap();
        let b = codec.issue_pair(user_id, "alice").unwrap();
        assert_ne!(a.access_token_id, a.refresh_token_id);
        assert_ne!(a.access_token_id, b.access_token_id);
        assert_ne!(a.refresh_token_id, b.refresh_token_id);
        assert_ne!(a.access_token, b.access_token);
    }

    #[test]
    fn expiry_is_checked_against_supplied_time() {
        let codec = codec();
        let issued = Utc::now();
        let pair = codec.issue_pair_at(Uuid::new_v4(), "alice", issued).unwrap();

        let just_before = issued + Duration::minutes(15);
        assert!(codec.verify_at(&pair.access_token, TokenKind::Access, just_before).is_ok());

        let after = issued + Duration::minutes(15) + Duration::seconds(1);
        assert_eq!(
            codec.verify_at(&pair.access_token, TokenKind::Access, after),
            Err(TokenError::Expired)
        );
        // The refresh token outlives the access token.
        assert!(codec.verify_at(&pair.refresh_token, TokenKind::Refresh, after).is_ok());
    }

    #[test]
    fn not_before_in_future_is_invalid() {
        let codec = codec();
        let issued = Utc::now();
        let pair = codec.issue_pair_at(Uuid::new_v4(), "alice", issued).unwrap();
        let earlier = issued - Duration::seconds(5);
        assert_eq!(
            codec.verify_at(&pair.access_token, TokenKind::Access, earlier),
            Err(TokenError::Invalid("token not yet valid"))
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let codec = codec();
        assert_eq!(codec.verify("", TokenKind::Access), Err(TokenError::Malformed));
        assert_eq!(codec.verify("abc", TokenKind::Access), Err(TokenError::Malformed));
        assert_eq!(
            codec.verify("a.b.c", TokenKind::Access),
            Err(TokenError::Malformed)
        );
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let codec = codec();
        let pair = codec.issue_pair(Uuid::new_v4(), "alice").unwrap();
        let (head, _) = pair.access_token.rsplit_once('.').unwrap();
        let tampered = format!("{head}.c2lnbmF0dXJl");
        assert_eq!(
            codec.verify(&tampered, TokenKind::Access),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn other_signing_method_is_rejected() {
        let token = forge(valid_claims(), "access-secret", Algorithm::HS512);
        assert_eq!(
            codec().verify(&token, TokenKind::Access),
            Err(TokenError::BadSignature)
        );
    }

    #[test]
    fn forged_valid_claims_are_accepted() {
        let token = forge(valid_claims(), "access-secret", Algorithm::HS256);
        assert!(codec().verify(&token, TokenKind::Access).is_ok());
    }

    #[test]
    fn missing_claims_are_invalid() {
        for (field, reason) in [
            ("sub", "missing sub"),
            ("jti", "missing jti"),
            ("token_type", "missing token_type"),
        ] {
            let mut claims = valid_claims();
            claims.as_object_mut().unwrap().remove(field);
            let token = forge(claims, "access-secret", Algorithm::HS256);
            assert_eq!(
                codec().verify(&token, TokenKind::Access),
                Err(TokenError::Invalid(reason)),
                "field {field}"
            );
        }
    }

    #[test]
    fn unknown_kind_and_issuer_are_invalid() {
        let mut claims = valid_claims();
        claims["token_type"] = json!("session");
        let token = forge(claims, "access-secret", Algorithm::HS256);
        assert_eq!(
            codec().verify(&token, TokenKind::Access),
            Err(TokenError::Invalid("unknown token_type"))
        );

        let mut claims = valid_claims();
        claims["iss"] = json!("someone-else");
        let token = forge(claims, "access-secret", Algorithm::HS256);
        assert_eq!(
            codec().verify(&token, TokenKind::Access),
            Err(TokenError::Invalid("unexpected issuer"))
        );
    }

    #[test]
    fn debug_redacts_secrets() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("access-secret"));
        assert!(rendered.contains("<redacted>"));
    }
}
