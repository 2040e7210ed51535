use super::{
    breaker::{BreakerConfig, CircuitBreaker, CircuitState},
    lockout::LockoutPolicy,
};
use crate::store::{CredentialStore, LoginState, NewUser, PasswordDigest, StoreError, UserId, UserRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{future::Future, sync::Arc};
use tracing::debug;

/// Credential store wrapped in a circuit breaker.
///
/// Only [`StoreError::Unavailable`] counts as a failure. Conflicts and other
/// backend errors prove the store is reachable and count as successes.
pub struct GuardedStore {
    inner: Arc<dyn CredentialStore>,
    breaker: CircuitBreaker,
}

impl GuardedStore {
    #[must_use]
    pub fn new(inner: Arc<dyn CredentialStore>, config: BreakerConfig) -> Self {
        Self {
            inner,
            breaker: CircuitBreaker::new(config),
        }
    }

    #[must_use]
    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Reach the store directly, bypassing the breaker. Health checks use this
    /// so they neither take the half-open slot nor feed the failure count.
    ///
    /// # Errors
    /// Whatever the wrapped store returns.
    pub async fn ping_unguarded(&self) -> Result<(), StoreError> {
        self.inner.ping().await
    }

    async fn guarded<T, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, StoreError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, StoreError>> + Send,
    {
        let Ok(permit) = self.breaker.acquire() else {
            debug!(operation, "credential store call short-circuited");
            return Err(StoreError::Unavailable("circuit breaker open".to_string()));
        };

        let result = call().await;
        if matches!(result, Err(StoreError::Unavailable(_))) {
            permit.failure();
        } else {
            permit.success();
        }
        result
    }
}

#[async_trait]
impl CredentialStore for GuardedStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.guarded("find_by_id", || self.inner.find_by_id(id)).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        self.guarded("find_by_email", || self.inner.find_by_email(email))
            .await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.guarded("find_by_username", || self.inner.find_by_username(username))
            .await
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        self.guarded("create", || self.inner.create(user)).await
    }

    async fn update_login_state(&self, id: UserId, state: LoginState) -> Result<(), StoreError> {
        self.guarded("update_login_state", || {
            self.inner.update_login_state(id, state)
        })
        .await
    }

    async fn record_failed_login(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginState>, StoreError> {
        self.guarded("record_failed_login", || {
            self.inner.record_failed_login(id, policy, now)
        })
        .await
    }

    async fn set_active(&self, id: UserId, active: bool) -> Result<bool, StoreError> {
        self.guarded("set_active", || self.inner.set_active(id, active))
            .await
    }

    async fn set_password(&self, id: UserId, digest: PasswordDigest) -> Result<bool, StoreError> {
        self.guarded("set_password", || self.inner.set_password(id, digest))
            .await
    }

    async fn soft_delete(&self, id: UserId) -> Result<bool, StoreError> {
        self.guarded("soft_delete", || self.inner.soft_delete(id))
            .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.guarded("ping", || self.inner.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::time::Duration;

    fn guarded() -> (Arc<MemoryStore>, GuardedStore) {
        let memory = Arc::new(MemoryStore::new());
        let store = GuardedStore::new(memory.clone(), BreakerConfig::default());
        (memory, store)
    }

    #[tokio::test(start_paused = true)]
    async fn outage_opens_breaker_and_fails_fast() {
        let (memory, store) = guarded();
        memory.set_unavailable(true);
        for _ in 0..5 {
            assert!(store.ping().await.is_err());
        }
        assert!(matches!(store.breaker_state(), CircuitState::Open { .. }));

        // Backend recovered, but the breaker still refuses until cooldown.
        memory.set_unavailable(false);
        assert!(matches!(
            store.find_by_id(UserId::new(1)).await,
            Err(StoreError::Unavailable(_))
        ));

        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.ping().await.is_ok());
        assert_eq!(store.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn unguarded_ping_leaves_the_breaker_alone() {
        let (memory, store) = guarded();
        memory.set_unavailable(true);
        for _ in 0..10 {
            assert!(store.ping_unguarded().await.is_err());
        }
        assert_eq!(store.breaker_state(), CircuitState::Closed);

        for _ in 0..5 {
            assert!(store.ping().await.is_err());
        }
        memory.set_unavailable(false);
        assert!(store.ping_unguarded().await.is_ok());
        assert!(matches!(store.breaker_state(), CircuitState::Open { .. }));

        // After the cooldown the half-open slot is still free for a real caller.
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(store.ping_unguarded().await.is_ok());
        assert!(matches!(store.breaker_state(), CircuitState::Open { .. }));
        assert!(store.find_by_id(UserId::new(1)).await.is_ok());
        assert_eq!(store.breaker_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn conflicts_do_not_trip_the_breaker() {
        let (_memory, store) = guarded();
        let new_user = || NewUser {
            username: "alice".to_string(),
            email: "a@x.com".to_string(),
            first_name: None,
            last_name: None,
            password_hash: PasswordDigest::from_phc("$argon2id$x".to_string()),
        };
        assert!(store.create(new_user()).await.is_ok());
        for _ in 0..10 {
            assert!(matches!(
                store.create(new_user()).await,
                Err(StoreError::Conflict { .. })
            ));
        }
        assert_eq!(store.breaker_state(), CircuitState::Closed);
    }
}
