//! Credential store contract and user record types.
//!
//! The store is the source of truth for user records. It never sees plaintext
//! passwords: the only credential it accepts is a [`PasswordDigest`], which is
//! produced by [`crate::auth::password::CredentialHasher`].
//!
//! Tombstoned (soft-deleted) records are invisible to every query.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::auth::lockout::LockoutPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;
use utoipa::ToSchema;

/// Numeric user identifier assigned by the store at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseUserIdError {
    #[error("user id is missing")]
    Missing,
    #[error("user id must be a positive integer without sign, spaces or leading zeros")]
    Malformed,
}

/// Parses identifiers coming from paths, query strings or bodies.
///
/// Only canonical positive decimal integers are accepted: `"7"` parses, while
/// `"07"`, `"+7"`, `" 7"`, `"7abc"` and `"0"` are rejected.
impl FromStr for UserId {
    type Err = ParseUserIdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(ParseUserIdError::Missing);
        }
        if !value.bytes().all(|b| b.is_ascii_digit()) || value.starts_with('0') {
            return Err(ParseUserIdError::Malformed);
        }
        value
            .parse::<i64>()
            .map(Self)
            .map_err(|_| ParseUserIdError::Malformed)
    }
}

/// Salted, self-describing password digest (PHC string format).
///
/// `Debug` is redacted and the type is never serialized.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordDigest(String);

impl PasswordDigest {
    pub(crate) fn from_phc(phc: String) -> Self {
        Self(phc)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PasswordDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PasswordDigest(***)")
    }
}

/// User snapshot without the credential. This is what the cache holds and what
/// responses serialize.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[schema(value_type = i64)]
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub is_active: bool,
    pub email_verified: bool,
    pub last_login_at: Option<DateTime<Utc>>,
    pub login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Full record as persisted, including the password digest.
#[derive(Clone, Debug)]
pub struct UserRecord {
    pub user: User,
    password_hash: PasswordDigest,
}

impl UserRecord {
    #[must_use]
    pub fn new(user: User, password_hash: PasswordDigest) -> Self {
        Self {
            user,
            password_hash,
        }
    }

    #[must_use]
    pub fn password_hash(&self) -> &PasswordDigest {
        &self.password_hash
    }

    #[must_use]
    pub fn id(&self) -> UserId {
        self.user.id
    }
}

/// Fields required to create a user. The email must already be normalized.
#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub password_hash: PasswordDigest,
}

/// Lockout and last-login fields written together on every login outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoginState {
    pub login_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached. Counts toward the circuit breaker.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("a user with this {field} already exists")]
    Conflict { field: &'static str },
    #[error("credential store error: {0}")]
    Backend(String),
}

/// Persistence contract consumed by the auth core.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a live (not tombstoned) record by id, active or not.
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError>;

    /// Case-insensitive lookup by email.
    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    /// Insert a record with `attempts = 0`, no lock, and `is_active = true`.
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    /// Write lockout counters and last-login stamp. Leaves the credential untouched.
    async fn update_login_state(&self, id: UserId, state: LoginState) -> Result<(), StoreError>;

    /// Count one failed password check against the stored counters and apply
    /// `policy` in a single atomic step, so concurrent failures are never lost.
    ///
    /// Returns the resulting counters, or `None` when no live record matched.
    async fn record_failed_login(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginState>, StoreError>;

    /// Returns `false` when no live record matched.
    async fn set_active(&self, id: UserId, active: bool) -> Result<bool, StoreError>;

    /// Returns `false` when no live record matched.
    async fn set_password(&self, id: UserId, digest: PasswordDigest) -> Result<bool, StoreError>;

    /// Tombstone the record. Returns `false` when no live record matched.
    async fn soft_delete(&self, id: UserId) -> Result<bool, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
