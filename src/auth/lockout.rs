//! Per-account failure counting and temporary locks.
//!
//! The policy is pure: it reads a [`User`] snapshot and an instant and returns
//! the [`LoginState`] to persist. Lock expiry is computed at read time, nothing
//! clears stale `locked_until` values in the background.

use crate::store::{LoginState, User};
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_THRESHOLD: u32 = 5;
pub const DEFAULT_WINDOW: std::time::Duration = std::time::Duration::from_secs(15 * 60);

#[derive(Clone, Copy, Debug)]
pub struct LockoutPolicy {
    threshold: u32,
    window: Duration,
}

impl LockoutPolicy {
    /// A threshold of zero is treated as one.
    #[must_use]
    pub fn new(threshold: u32, window: std::time::Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
        }
    }

    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// When a lock placed at `now` ends.
    #[must_use]
    pub fn lock_expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    #[must_use]
    pub fn is_locked(&self, user: &User, now: DateTime<Utc>) -> bool {
        user.locked_until.is_some_and(|until| until > now)
    }

    /// State after a failed password check.
    ///
    /// While locked the counter still moves but `locked_until` stays fixed. A
    /// lock that has already expired restarts counting from zero.
    #[must_use]
    pub fn on_failure(&self, user: &User, now: DateTime<Utc>) -> LoginState {
        if self.is_locked(user, now) {
            return LoginState {
                login_attempts: user.login_attempts.saturating_add(1),
                locked_until: user.locked_until,
                last_login_at: None,
            };
        }

        let previous = if user.locked_until.is_some() {
            0
        } else {
            user.login_attempts
        };
        let attempts = previous.saturating_add(1);
        let locked_until = (attempts >= self.threshold).then(|| self.lock_expiry(now));

        LoginState {
            login_attempts: attempts,
            locked_until,
            last_login_at: None,
        }
    }

    /// State after a successful login. This is the only early exit from a lock.
    #[must_use]
    pub fn on_success(&self, now: DateTime<Utc>) -> LoginState {
        LoginState {
            login_attempts: 0,
            locked_until: None,
            last_login_at: Some(now),
        }
    }
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, DEFAULT_WINDOW)
    }
}
