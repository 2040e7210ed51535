//! Account use cases: registration, login, password change, deactivation
//! and removal.
//!
//! Every path that changes activity, lockout counters, the credential or the
//! tombstone invalidates the cache entry for the user before returning.

use super::{
    token::TokenSubject,
    validate::{self, Violations},
    AuthError, AuthState,
};
use crate::store::{CredentialStore, NewUser, PasswordDigest, User, UserId};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use tracing::{info, instrument, warn};

#[derive(Debug)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: SecretString,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[derive(Debug)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

/// A user together with a freshly issued bearer token.
#[derive(Clone, Debug)]
pub struct Session {
    pub user: User,
    pub token: String,
}

pub struct AuthService<'a> {
    state: &'a AuthState,
}

impl<'a> AuthService<'a> {
    #[must_use]
    pub fn new(state: &'a AuthState) -> Self {
        Self { state }
    }

    /// Create an account and sign the first token.
    ///
    /// # Errors
    /// `Validation`, `Conflict`, `CredentialStoreUnavailable` or `Internal`.
    #[instrument(skip_all, fields(username = %registration.username))]
    pub async fn register(&self, registration: Registration) -> Result<Session, AuthError> {
        let email = validate::normalize_email(&registration.email);
        let first_name = registration.first_name.map(|name| name.trim().to_string());
        let last_name = registration.last_name.map(|name| name.trim().to_string());

        let mut violations = Violations::new();
        violations.check(
            validate::valid_username(&registration.username),
            "Username must be 3-50 alphanumeric characters",
        );
        violations.check(validate::valid_email(&email), "Email must be a valid email");
        violations.check(
            validate::valid_password(registration.password.expose_secret()),
            "Password must be 6-128 characters",
        );
        violations.check(
            first_name.as_deref().map_or(true, validate::valid_name),
            "First name must be 1-50 characters",
        );
        violations.check(
            last_name.as_deref().map_or(true, validate::valid_name),
            "Last name must be 1-50 characters",
        );
        violations.finish().map_err(AuthError::Validation)?;

        let store = self.state.store();
        if store
            .find_by_email(&email)
            .await
            .map_err(|err| AuthError::from_store("register.find_by_email", err))?
            .is_some()
        {
            return Err(AuthError::Conflict { field: "email" });
        }
        if store
            .find_by_username(&registration.username)
            .await
            .map_err(|err| AuthError::from_store("register.find_by_username", err))?
            .is_some()
        {
            return Err(AuthError::Conflict { field: "username" });
        }

        let password_hash = self.hash(registration.password).await?;
        let record = store
            .create(NewUser {
                username: registration.username,
                email,
                first_name,
                last_name,
                password_hash,
            })
            .await
            .map_err(|err| AuthError::from_store("register.create", err))?;

        let token = self.state.tokens().issue(&TokenSubject::from(&record.user))?;
        info!(user_id = %record.id(), "user registered");

        Ok(Session {
            user: record.user,
            token,
        })
    }

    /// Check credentials and apply the lockout policy.
    ///
    /// Unknown and inactive accounts both answer `InvalidCredentials`. A
    /// failed password check is persisted before returning; the reset after a
    /// success is written in the background.
    ///
    /// # Errors
    /// `Validation`, `InvalidCredentials`, `AccountLocked`,
    /// `CredentialStoreUnavailable` or `Internal`.
    #[instrument(skip_all, fields(user_id))]
    pub async fn login(&self, credentials: Credentials) -> Result<Session, AuthError> {
        let email = validate::normalize_email(&credentials.email);

        let mut violations = Violations::new();
        violations.check(validate::valid_email(&email), "Email must be a valid email");
        violations.check(
            !credentials.password.expose_secret().is_empty(),
            "Password is required",
        );
        violations.finish().map_err(AuthError::Validation)?;

        let store = self.state.store();
        let record = store
            .find_by_email(&email)
            .await
            .map_err(|err| AuthError::from_store("login.find_by_email", err))?
            .ok_or(AuthError::InvalidCredentials)?;
        let user_id = record.id();
        tracing::Span::current().record("user_id", user_id.get());

        if !record.user.is_active {
            return Err(AuthError::InvalidCredentials);
        }

        let lockout = self.state.lockout();
        if lockout.is_locked(&record.user, Utc::now()) {
            return Err(AuthError::AccountLocked);
        }

        let digest = record.password_hash().clone();
        if !self.verify(credentials.password, digest).await? {
            // Counted in the store so concurrent failures cannot overwrite each other.
            let state = store
                .record_failed_login(user_id, lockout, Utc::now())
                .await
                .map_err(|err| AuthError::from_store("login.record_failure", err))?;
            self.state.cache().invalidate(user_id).await;

            let Some(state) = state else {
                return Err(AuthError::InvalidCredentials);
            };
            if state.locked_until.is_some() {
                warn!(attempts = state.login_attempts, "account locked after failed logins");
            }
            return Err(AuthError::InvalidCredentials);
        }

        let now = Utc::now();
        let state = lockout.on_success(now);
        self.state.writer.dispatch(user_id, state);
        self.state.cache().invalidate(user_id).await;

        let mut user = record.user;
        user.login_attempts = state.login_attempts;
        user.locked_until = state.locked_until;
        user.last_login_at = Some(now);

        let token = self.state.tokens().issue(&TokenSubject::from(&user))?;
        info!("login succeeded");

        Ok(Session { user, token })
    }

    /// Replace the credential after checking the current one.
    ///
    /// # Errors
    /// `Validation`, `InvalidCredentials`, `UserNotFound`,
    /// `CredentialStoreUnavailable` or `Internal`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn change_password(
        &self,
        user_id: UserId,
        current: SecretString,
        new: SecretString,
    ) -> Result<(), AuthError> {
        let mut violations = Violations::new();
        violations.check(
            !current.expose_secret().is_empty(),
            "Current password is required",
        );
        violations.check(
            validate::valid_password(new.expose_secret()),
            "New password must be 6-128 characters",
        );
        violations.finish().map_err(AuthError::Validation)?;

        let store = self.state.store();
        let record = store
            .find_by_id(user_id)
            .await
            .map_err(|err| AuthError::from_store("change_password.find_by_id", err))?
            .ok_or(AuthError::UserNotFound)?;

        if !self.verify(current, record.password_hash().clone()).await? {
            return Err(AuthError::InvalidCredentials);
        }

        let digest = self.hash(new).await?;
        let updated = store
            .set_password(user_id, digest)
            .await
            .map_err(|err| AuthError::from_store("change_password.set_password", err))?;
        self.state.cache().invalidate(user_id).await;

        if updated {
            info!("password changed");
            Ok(())
        } else {
            Err(AuthError::UserNotFound)
        }
    }

    /// # Errors
    /// `UserNotFound`, `CredentialStoreUnavailable` or `Internal`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn deactivate(&self, user_id: UserId) -> Result<(), AuthError> {
        let updated = self
            .state
            .store()
            .set_active(user_id, false)
            .await
            .map_err(|err| AuthError::from_store("deactivate", err))?;
        self.state.cache().invalidate(user_id).await;

        if updated {
            info!("account deactivated");
            Ok(())
        } else {
            Err(AuthError::UserNotFound)
        }
    }

    /// Tombstone the account. The row stays but no query returns it.
    ///
    /// # Errors
    /// `UserNotFound`, `CredentialStoreUnavailable` or `Internal`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn delete_account(&self, user_id: UserId) -> Result<(), AuthError> {
        let deleted = self
            .state
            .store()
            .soft_delete(user_id)
            .await
            .map_err(|err| AuthError::from_store("delete_account", err))?;
        self.state.cache().invalidate(user_id).await;

        if deleted {
            info!("account deleted");
            Ok(())
        } else {
            Err(AuthError::UserNotFound)
        }
    }

    /// Cache-then-store lookup of a live user.
    ///
    /// # Errors
    /// `UserNotFound`, `CredentialStoreUnavailable` or `Internal`.
    pub async fn find_user(&self, user_id: UserId) -> Result<User, AuthError> {
        self.state.resolve_user(user_id).await
    }

    async fn hash(&self, plaintext: SecretString) -> Result<PasswordDigest, AuthError> {
        let hasher = self.state.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(&plaintext))
            .await
            .map_err(|err| AuthError::internal("password.hash", err.to_string()))?
            .map_err(|err| AuthError::internal("password.hash", err.to_string()))
    }

    async fn verify(
        &self,
        plaintext: SecretString,
        digest: PasswordDigest,
    ) -> Result<bool, AuthError> {
        let hasher = self.state.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(&plaintext, &digest))
            .await
            .map_err(|err| AuthError::internal("password.verify", err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support;
    use std::sync::Arc;

    fn secret(value: &str) -> SecretString {
        SecretString::from(value.to_string())
    }

    fn alice() -> Registration {
        Registration {
            username: "alice".to_string(),
            email: "A@X.com".to_string(),
            password: secret("secret1"),
            first_name: Some("Alice".to_string()),
            last_name: None,
        }
    }

    fn login_as(email: &str, password: &str) -> Credentials {
        Credentials {
            email: email.to_string(),
            password: secret(password),
        }
    }

    #[tokio::test]
    async fn register_then_login_issues_token_for_normalized_email() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;
        assert_eq!(registered.user.email, "a@x.com");
        assert_eq!(registered.user.first_name.as_deref(), Some("Alice"));

        let session = state.service().login(login_as("a@x.com", "secret1")).await?;
        let claims = state.tokens().verify(&session.token)?;
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.user_id, registered.user.id);
        assert!(session.user.last_login_at.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn register_stores_a_digest_not_the_password() -> Result<(), AuthError> {
        let (memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;
        let record = memory
            .find_by_id(registered.user.id)
            .await
            .map_err(|err| AuthError::from_store("test", err))?;
        let digest = record.map(|r| r.password_hash().as_str().to_string());
        assert!(digest.is_some_and(|d| d.starts_with("$argon2id$") && !d.contains("secret1")));
        Ok(())
    }

    #[tokio::test]
    async fn register_rejects_duplicates_and_bad_input() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        state.service().register(alice()).await?;

        let same_email = Registration {
            username: "other".to_string(),
            ..alice()
        };
        assert!(matches!(
            state.service().register(same_email).await,
            Err(AuthError::Conflict { field: "email" })
        ));

        let same_username = Registration {
            email: "b@x.com".to_string(),
            ..alice()
        };
        assert!(matches!(
            state.service().register(same_username).await,
            Err(AuthError::Conflict { field: "username" })
        ));

        let invalid = Registration {
            username: "a!".to_string(),
            email: "nope".to_string(),
            password: secret("123"),
            first_name: Some(String::new()),
            last_name: None,
        };
        match state.service().register(invalid).await {
            Err(AuthError::Validation(messages)) => assert_eq!(messages.len(), 4),
            other => panic!("expected validation error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn login_failures_lock_the_account() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        state.service().register(alice()).await?;

        for _ in 0..5 {
            assert!(matches!(
                state.service().login(login_as("a@x.com", "wrong-pass")).await,
                Err(AuthError::InvalidCredentials)
            ));
        }

        assert!(matches!(
            state.service().login(login_as("a@x.com", "secret1")).await,
            Err(AuthError::AccountLocked)
        ));
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_failed_logins_are_all_counted() -> Result<(), AuthError> {
        let (memory, state) = test_support::state();
        let state = Arc::new(state);
        let registered = state.service().register(alice()).await?;

        let attempts: Vec<_> = (0..10)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    state.service().login(login_as("a@x.com", "wrong-pass")).await
                })
            })
            .collect();

        let mut rejected = 0;
        for attempt in attempts {
            match attempt.await {
                Ok(Err(AuthError::InvalidCredentials)) => rejected += 1,
                Ok(Err(AuthError::AccountLocked)) => {}
                other => panic!("expected a failed login, got {other:?}"),
            }
        }

        let record = memory
            .find_by_id(registered.user.id)
            .await
            .map_err(|err| AuthError::from_store("test", err))?;
        let Some(record) = record else {
            panic!("record should exist");
        };
        // Every rejected password check left its mark; none were overwritten.
        assert_eq!(record.user.login_attempts, rejected);
        assert!(rejected >= 5);
        assert!(record.user.locked_until.is_some());
        assert!(matches!(
            state.service().login(login_as("a@x.com", "secret1")).await,
            Err(AuthError::AccountLocked)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn login_outcomes_invalidate_the_cache() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;
        let id = registered.user.id;

        state.cache().set(id, registered.user.clone()).await;
        assert!(state.service().login(login_as("a@x.com", "wrong-pass")).await.is_err());
        assert!(state.cache().get(id).await.is_none());

        state.cache().set(id, registered.user.clone()).await;
        state.service().login(login_as("a@x.com", "secret1")).await?;
        assert!(state.cache().get(id).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn success_resets_failure_count() -> Result<(), AuthError> {
        let (memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;

        for _ in 0..4 {
            let _ = state.service().login(login_as("a@x.com", "wrong-pass")).await;
        }
        let session = state.service().login(login_as("a@x.com", "secret1")).await?;
        assert_eq!(session.user.login_attempts, 0);

        // The reset is written in the background; wait for it to land.
        let mut attempts = u32::MAX;
        for _ in 0..50 {
            let record = memory
                .find_by_id(registered.user.id)
                .await
                .map_err(|err| AuthError::from_store("test", err))?;
            attempts = record.map_or(u32::MAX, |r| r.user.login_attempts);
            if attempts == 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(attempts, 0);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_and_inactive_accounts_are_invalid_credentials() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;

        assert!(matches!(
            state.service().login(login_as("nobody@x.com", "secret1")).await,
            Err(AuthError::InvalidCredentials)
        ));

        state.service().deactivate(registered.user.id).await?;
        assert!(matches!(
            state.service().login(login_as("a@x.com", "secret1")).await,
            Err(AuthError::InvalidCredentials)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn mutations_invalidate_the_cache() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;
        let id = registered.user.id;

        state.cache().set(id, registered.user.clone()).await;
        state
            .service()
            .change_password(id, secret("secret1"), secret("secret2"))
            .await?;
        assert!(state.cache().get(id).await.is_none());

        state.cache().set(id, registered.user.clone()).await;
        state.service().deactivate(id).await?;
        assert!(state.cache().get(id).await.is_none());

        state.cache().set(id, registered.user.clone()).await;
        state.service().delete_account(id).await?;
        assert!(state.cache().get(id).await.is_none());
        assert!(matches!(
            state.service().find_user(id).await,
            Err(AuthError::UserNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn change_password_requires_current_password() -> Result<(), AuthError> {
        let (_memory, state) = test_support::state();
        let registered = state.service().register(alice()).await?;
        let id = registered.user.id;

        assert!(matches!(
            state
                .service()
                .change_password(id, secret("wrong-pass"), secret("secret2"))
                .await,
            Err(AuthError::InvalidCredentials)
        ));

        state
            .service()
            .change_password(id, secret("secret1"), secret("secret2"))
            .await?;
        assert!(state.service().login(login_as("a@x.com", "secret2")).await.is_ok());
        assert!(matches!(
            state.service().login(login_as("a@x.com", "secret1")).await,
            Err(AuthError::InvalidCredentials)
        ));
        Ok(())
    }
}
