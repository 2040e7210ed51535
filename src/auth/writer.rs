//! Detached writes of login state.
//!
//! A successful login resets the lockout counters without making the caller
//! wait for the store. Each write runs on its own task and failures are sent
//! to a channel that a logging task drains.

use crate::store::{CredentialStore, LoginState, StoreError, UserId};
use std::sync::Arc;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error};

#[derive(Debug)]
pub struct WriteFailure {
    pub user_id: UserId,
    pub error: StoreError,
}

#[derive(Clone)]
pub struct LoginStateWriter {
    store: Arc<dyn CredentialStore>,
    failures: mpsc::UnboundedSender<WriteFailure>,
}

impl LoginStateWriter {
    /// Writer plus the receiving end of its failure channel.
    #[must_use]
    pub fn new(store: Arc<dyn CredentialStore>) -> (Self, mpsc::UnboundedReceiver<WriteFailure>) {
        let (failures, rx) = mpsc::unbounded_channel();
        (Self { store, failures }, rx)
    }

    /// Writer whose failures are logged by a background task.
    #[must_use]
    pub fn with_logging(store: Arc<dyn CredentialStore>) -> Self {
        let (writer, rx) = Self::new(store);
        spawn_failure_logger(rx);
        writer
    }

    /// Fire and forget. The returned handle is only useful to tests.
    pub fn dispatch(&self, user_id: UserId, state: LoginState) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let failures = self.failures.clone();

        tokio::spawn(async move {
            match store.update_login_state(user_id, state).await {
                Ok(()) => debug!(user_id = %user_id, "login state written"),
                Err(error) => {
                    // Receiver gone means nobody is listening anymore.
                    let _ = failures.send(WriteFailure { user_id, error });
                }
            }
        })
    }
}

/// Drain write failures into the log until every sender is dropped.
pub fn spawn_failure_logger(mut rx: mpsc::UnboundedReceiver<WriteFailure>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(failure) = rx.recv().await {
            error!(
                user_id = %failure.user_id,
                operation = "login_state.reset",
                "failed to persist login state: {}",
                failure.error
            );
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, NewUser, PasswordDigest};
    use chrono::Utc;

    async fn store_with_user() -> Result<(Arc<MemoryStore>, UserId), StoreError> {
        let store = Arc::new(MemoryStore::new());
        let record = store
            .create(NewUser {
                username: "alice".to_string(),
                email: "a@x.com".to_string(),
                first_name: None,
                last_name: None,
                password_hash: PasswordDigest::from_phc("$argon2id$x".to_string()),
            })
            .await?;
        Ok((store, record.id()))
    }

    #[tokio::test]
    async fn dispatch_persists_state() -> Result<(), StoreError> {
        let (store, id) = store_with_user().await?;
        let (writer, _rx) = LoginStateWriter::new(store.clone());
        let now = Utc::now();

        let handle = writer.dispatch(
            id,
            LoginState {
                login_attempts: 0,
                locked_until: None,
                last_login_at: Some(now),
            },
        );
        assert!(handle.await.is_ok());

        let record = store.find_by_id(id).await?;
        assert_eq!(record.and_then(|r| r.user.last_login_at), Some(now));
        Ok(())
    }

    #[tokio::test]
    async fn failures_are_reported_on_the_channel() -> Result<(), StoreError> {
        let (store, id) = store_with_user().await?;
        let (writer, mut rx) = LoginStateWriter::new(store.clone());
        store.set_unavailable(true);

        let handle = writer.dispatch(
            id,
            LoginState {
                login_attempts: 0,
                locked_until: None,
                last_login_at: None,
            },
        );
        assert!(handle.await.is_ok());

        let failure = rx.recv().await;
        assert!(matches!(
            failure,
            Some(WriteFailure {
                error: StoreError::Unavailable(_),
                ..
            })
        ));
        Ok(())
    }
}
