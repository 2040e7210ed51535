//! Time-bounded memoization of user lookups.
//!
//! Entries are snapshots without credentials. The store stays the source of
//! truth: every mutation that touches activity, lockout, password or tombstone
//! must call [`UserCache::invalidate`].

use crate::store::{User, UserId};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Clone, Debug)]
struct CacheEntry {
    user: User,
    captured_at: Instant,
}

#[derive(Debug)]
pub struct UserCache {
    entries: RwLock<HashMap<UserId, CacheEntry>>,
    ttl: Duration,
}

impl UserCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns `None` both for unknown ids and for entries older than the TTL.
    pub async fn get(&self, id: UserId) -> Option<User> {
        let entries = self.entries.read().await;
        entries
            .get(&id)
            .filter(|entry| entry.captured_at.elapsed() < self.ttl)
            .map(|entry| entry.user.clone())
    }

    pub async fn set(&self, id: UserId, user: User) {
        let entry = CacheEntry {
            user,
            captured_at: Instant::now(),
        };
        self.entries.write().await.insert(id, entry);
    }

    pub async fn invalidate(&self, id: UserId) {
        if self.entries.write().await.remove(&id).is_some() {
            debug!(user_id = %id, "cache entry invalidated");
        }
    }

    /// Drop expired entries and return how many were removed.
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.captured_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Number of stored entries, expired ones included until swept.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Spawn the periodic sweeper. It stops when `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("cache sweeper shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = cache.sweep().await;
                        if removed > 0 {
                            debug!(removed, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }
}

impl Default for UserCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: i64) -> User {
        let now = Utc::now();
        User {
            id: UserId::new(id),
            username: format!("user{id}"),
            email: format!("user{id}@x.com"),
            first_name: None,
            last_name: None,
            is_active: true,
            email_verified: false,
            last_login_at: None,
            login_attempts: 0,
            locked_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn get_returns_value_within_ttl() {
        let cache = UserCache::new(Duration::from_secs(300));
        cache.set(UserId::new(1), user(1)).await;

        tokio::time::advance(Duration::from_secs(299)).await;
        let cached = cache.get(UserId::new(1)).await;
        assert_eq!(cached.map(|u| u.username), Some("user1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire_after_ttl() {
        let cache = UserCache::new(Duration::from_secs(300));
        cache.set(UserId::new(1), user(1)).await;

        tokio::time::advance(Duration::from_secs(300)).await;
        assert!(cache.get(UserId::new(1)).await.is_none());
        // Still stored until swept.
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn set_refreshes_capture_instant() {
        let cache = UserCache::new(Duration::from_secs(300));
        cache.set(UserId::new(1), user(1)).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.set(UserId::new(1), user(1)).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        assert!(cache.get(UserId::new(1)).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_and_clear() {
        let cache = UserCache::default();
        cache.set(UserId::new(1), user(1)).await;
        cache.set(UserId::new(2), user(2)).await;

        cache.invalidate(UserId::new(1)).await;
        assert!(cache.get(UserId::new(1)).await.is_none());
        assert!(cache.get(UserId::new(2)).await.is_some());

        cache.clear().await;
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_only_expired_entries() {
        let cache = UserCache::new(Duration::from_secs(300));
        cache.set(UserId::new(1), user(1)).await;
        tokio::time::advance(Duration::from_secs(200)).await;
        cache.set(UserId::new(2), user(2)).await;
        tokio::time::advance(Duration::from_secs(150)).await;

        assert_eq!(cache.sweep().await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(UserId::new(2)).await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_periodically_and_stops_on_cancel() {
        let cache = Arc::new(UserCache::new(Duration::from_secs(60)));
        let cancel = CancellationToken::new();
        let handle = cache.spawn_sweeper(Duration::from_secs(120), cancel.clone());

        cache.set(UserId::new(1), user(1)).await;
        tokio::time::sleep(Duration::from_secs(121)).await;
        assert!(cache.is_empty().await);

        cancel.cancel();
        assert!(handle.await.is_ok());
    }
}
