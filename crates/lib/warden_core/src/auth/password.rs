//! Password hashing via bcrypt, plus composition rules.
//!
//! [`hash_password`] and [`verify_password`] are synchronous and deliberately
//! slow. Async callers go through [`PasswordPolicy`], which runs them on the
//! blocking pool so request tasks keep making progress.

use thiserror::Error;

/// Lowest bcrypt cost accepted.
pub const MIN_COST: u32 = 4;

/// Highest bcrypt cost accepted.
pub const MAX_COST: u32 = 31;

/// bcrypt cost used when none is configured.
pub const DEFAULT_COST: u32 = bcrypt::DEFAULT_COST;

/// Password hashing / verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PasswordError {
    #[error("bcrypt cost {0} outside 4..=31")]
    InvalidConfig(u32),

    #[error("password hashing failed: {0}")]
    HashingFailure(String),

    #[error("password does not match")]
    Mismatch,
}

/// First composition rule a password broke.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordViolation {
    #[error("password is required")]
    Empty,

    #[error("password must be at least {0} characters long")]
    TooShort(usize),

    #[error("password must not exceed {0} characters")]
    TooLong(usize),

    #[error("password must contain at least {0} uppercase letter(s)")]
    Uppercase(usize),

    #[error("password must contain at least {0} lowercase letter(s)")]
    Lowercase(usize),

    #[error("password must contain at least {0} digit(s)")]
    Digits(usize),

    #[error("password must contain at least {0} special character(s)")]
    Special(usize),
}

/// Password composition requirements. A minimum of 0 disables that rule.
///
/// Lengths are measured in bytes since bcrypt only reads the first 72.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordRules {
    pub min_length: usize,
    pub max_length: usize,
    pub min_uppercase: usize,
    pub min_lowercase: usize,
    pub min_digits: usize,
    pub min_special: usize,
}

impl Default for PasswordRules {
    fn default() -> Self {
        Self {
            min_length: 8,
            max_length: 72,
            min_uppercase: 1,
            min_lowercase: 1,
            min_digits: 1,
            min_special: 1,
        }
    }
}

/// Hash a password with bcrypt at the given cost.
///
/// Costs outside [`MIN_COST`]..=[`MAX_COST`] are rejected, not clamped.
pub fn hash_password(password: &str, cost: u32) -> Result<String, PasswordError> {
    if !(MIN_COST..=MAX_COST).contains(&cost) {
        return Err(PasswordError::InvalidConfig(cost));
    }
    bcrypt::hash(password, cost).map_err(|e| PasswordError::HashingFailure(e.to_string()))
}

/// Verify a candidate password against a bcrypt hash.
///
/// Empty input on either side is a mismatch without attempting a comparison.
/// An unparseable stored hash is reported as `HashingFailure`.
pub fn verify_password(hash: &str, candidate: &str) -> Result<(), PasswordError> {
    if hash.is_empty() || candidate.is_empty() {
        return Err(PasswordError::Mismatch);
    }
    match bcrypt::verify(candidate, hash) {
        Ok(true) => Ok(()),
        Ok(false) => Err(PasswordError::Mismatch),
        Err(e) => Err(PasswordError::HashingFailure(e.to_string())),
    }
}

/// Check a password against the composition rules.
///
/// Rules are checked in a fixed order (empty, min length, max length,
/// uppercase, lowercase, digits, special) and the first failure is returned.
pub fn validate_complexity(password: &str, rules: &PasswordRules) -> Result<(), PasswordViolation> {
    if password.is_empty() {
        return Err(PasswordViolation::Empty);
    }
    if password.len() < rules.min_length {
        return Err(PasswordViolation::TooShort(rules.min_length));
    }
    if password.len() > rules.max_length {
        return Err(PasswordViolation::TooLong(rules.max_length));
    }

    let (mut upper, mut lower, mut digits, mut special) = (0, 0, 0, 0);
    for c in password.chars() {
        if c.is_uppercase() {
            upper += 1;
        } else if c.is_lowercase() {
            lower += 1;
        } else if c.is_numeric() {
            digits += 1;
        } else if !c.is_alphanumeric() && !c.is_whitespace() {
            special += 1;
        }
    }

    if upper < rules.min_uppercase {
        return Err(PasswordViolation::Uppercase(rules.min_uppercase));
    }
    if lower < rules.min_lowercase {
        return Err(PasswordViolation::Lowercase(rules.min_lowercase));
    }
    if digits < rules.min_digits {
        return Err(PasswordViolation::Digits(rules.min_digits));
    }
    if special < rules.min_special {
        return Err(PasswordViolation::Special(rules.min_special));
    }
    Ok(())
}

/// Cost factor + composition rules, with async wrappers that run bcrypt on
/// the blocking pool.
#[derive(Debug, Clone)]
pub struct PasswordPolicy {
    cost: u32,
    rules: PasswordRules,
}

impl PasswordPolicy {
    /// Build a policy, rejecting an out-of-range cost up front.
    pub fn new(cost: u32, rules: PasswordRules) -> Result<Self, PasswordError> {
        if !(MIN_COST..=MAX_COST).contains(&cost) {
            return Err(PasswordError::InvalidConfig(cost));
        }
        Ok(Self { cost, rules })
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }

    pub fn rules(&self) -> &PasswordRules {
        &self.rules
    }

    pub fn validate_complexity(&self, password: &str) -> Result<(), PasswordViolation> {
        validate_complexity(password, &self.rules)
    }

    /// Hash on the blocking pool.
    pub async fn hash(&self, password: &str) -> Result<String, PasswordError> {
        let password = password.to_string();
        let cost = self.cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(|e| PasswordError::HashingFailure(format!("hashing task: {e}")))?
    }

    /// Verify on the blocking pool.
    pub async fn verify(&self, hash: &str, candidate: &str) -> Result<(), PasswordError> {
        let hash = hash.to_string();
        let candidate = candidate.to_string();
        tokio::task::spawn_blocking(move || verify_password(&hash, &candidate))
            .await
            .map_err(|e| PasswordError::HashingFailure(format!("verify task: {e}")))?
    }
}
