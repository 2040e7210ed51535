//! In-memory credential store used for local development and tests.

use super::{
    CredentialStore, LoginState, NewUser, PasswordDigest, StoreError, User, UserId, UserRecord,
};
use crate::auth::lockout::LockoutPolicy;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicI64, Ordering},
};
use tokio::sync::RwLock;

struct Row {
    record: UserRecord,
    deleted_at: Option<DateTime<Utc>>,
}

impl Row {
    fn is_live(&self) -> bool {
        self.deleted_at.is_none()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    rows: RwLock<HashMap<UserId, Row>>,
    next_id: AtomicI64,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable backend: every call fails with
    /// [`StoreError::Unavailable`] until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    async fn find_live<F>(&self, predicate: F) -> Result<Option<UserRecord>, StoreError>
    where
        F: Fn(&User) -> bool + Send,
    {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|row| row.is_live() && predicate(&row.record.user))
            .map(|row| row.record.clone()))
    }

    async fn update_live<F>(&self, id: UserId, apply: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut UserRecord) + Send,
    {
        self.check_available()?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id).filter(|row| row.is_live()) {
            Some(row) => {
                apply(&mut row.record);
                row.record.user.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_by_id(&self, id: UserId) -> Result<Option<UserRecord>, StoreError> {
        self.check_available()?;
        let rows = self.rows.read().await;
        Ok(rows
            .get(&id)
            .filter(|row| row.is_live())
            .map(|row| row.record.clone()))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<UserRecord>, StoreError> {
        let email = email.to_lowercase();
        self.find_live(move |user| user.email == email).await
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        self.find_live(|user| user.username == username).await
    }

    async fn create(&self, new_user: NewUser) -> Result<UserRecord, StoreError> {
        self.check_available()?;
        let email = new_user.email.to_lowercase();
        let mut rows = self.rows.write().await;

        // Unique indexes only cover live rows, tombstoned identifiers can be reused.
        for row in rows.values().filter(|row| row.is_live()) {
            if row.record.user.email == email {
                return Err(StoreError::Conflict { field: "email" });
            }
            if row.record.user.username == new_user.username {
                return Err(StoreError::Conflict { field: "username" });
            }
        }

        let id = UserId::new(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let now = Utc::now();
        let record = UserRecord::new(
            User {
                id,
                username: new_user.username,
                email,
                first_name: new_user.first_name,
                last_name: new_user.last_name,
                is_active: true,
                email_verified: false,
                last_login_at: None,
                login_attempts: 0,
                locked_until: None,
                created_at: now,
                updated_at: now,
            },
            new_user.password_hash,
        );
        rows.insert(
            id,
            Row {
                record: record.clone(),
                deleted_at: None,
            },
        );
        Ok(record)
    }

    async fn update_login_state(&self, id: UserId, state: LoginState) -> Result<(), StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write().await;
        // Login-state writes skip the updated_at stamp, like the SQL store.
        if let Some(row) = rows.get_mut(&id).filter(|row| row.is_live()) {
            row.record.user.login_attempts = state.login_attempts;
            row.record.user.locked_until = state.locked_until;
            if state.last_login_at.is_some() {
                row.record.user.last_login_at = state.last_login_at;
            }
        }
        Ok(())
    }

    async fn record_failed_login(
        &self,
        id: UserId,
        policy: &LockoutPolicy,
        now: DateTime<Utc>,
    ) -> Result<Option<LoginState>, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write().await;
        Ok(rows.get_mut(&id).filter(|row| row.is_live()).map(|row| {
            let state = policy.on_failure(&row.record.user, now);
            row.record.user.login_attempts = state.login_attempts;
            row.record.user.locked_until = state.locked_until;
            state
        }))
    }

    async fn set_active(&self, id: UserId, active: bool) -> Result<bool, StoreError> {
        self.update_live(id, |record| record.user.is_active = active)
            .await
    }

    async fn set_password(&self, id: UserId, digest: PasswordDigest) -> Result<bool, StoreError> {
        self.update_live(id, |record| {
            *record = UserRecord::new(record.user.clone(), digest);
        })
        .await
    }

    async fn soft_delete(&self, id: UserId) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id).filter(|row| row.is_live()) {
            Some(row) => {
                row.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}
