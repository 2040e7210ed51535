//! Circuit breaker for credential store outages.
//!
//! ```text
//! Closed --(threshold failures inside window)--> Open
//! Open   --(cooldown elapsed)------------------> HalfOpen (one probe)
//! HalfOpen --probe ok--> Closed    HalfOpen --probe fails--> Open
//! ```
//!
//! State lives behind a `parking_lot::Mutex`; no I/O happens under the lock.

use parking_lot::Mutex;
use std::{fmt, time::Duration};
use tokio::time::Instant;
use tracing::{info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_FAILURE_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);
/// Longer cooldowns are clamped so `Instant` arithmetic cannot overflow.
pub const MAX_COOLDOWN: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub cooldown: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failure_window: DEFAULT_FAILURE_WINDOW,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    streak_started: Option<Instant>,
    probe_in_flight: bool,
}

/// Returned when the breaker refuses a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BreakerOpen;

#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    config: BreakerConfig,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                streak_started: None,
                probe_in_flight: false,
            }),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                cooldown: config.cooldown.min(MAX_COOLDOWN),
                ..config
            },
        }
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Ask to make a call. After the cooldown only one caller gets through
    /// (the probe) until its outcome is recorded.
    ///
    /// # Errors
    /// [`BreakerOpen`] while the breaker is open or a probe is already out.
    pub fn acquire(&self) -> Result<Permit<'_>, BreakerOpen> {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if let CircuitState::Open { until } = inner.state {
            if now < until {
                return Err(BreakerOpen);
            }
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = false;
            info!("credential store breaker half-open, probing");
        }

        let probe = match inner.state {
            CircuitState::HalfOpen if inner.probe_in_flight => return Err(BreakerOpen),
            CircuitState::HalfOpen => {
                inner.probe_in_flight = true;
                true
            }
            _ => false,
        };

        Ok(Permit {
            breaker: self,
            probe,
            settled: false,
        })
    }

    fn on_success(&self, probe: bool) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        inner.streak_started = None;
        if probe {
            inner.probe_in_flight = false;
            inner.state = CircuitState::Closed;
            info!("credential store breaker closed");
        }
    }

    fn on_failure(&self, probe: bool) {
        let mut inner = self.inner.lock();
        let now = Instant::now();

        if probe {
            inner.probe_in_flight = false;
            inner.state = CircuitState::Open {
                until: now + self.config.cooldown,
            };
            warn!("credential store probe failed, breaker reopened");
            return;
        }

        // A failure that lands while the breaker is already open changes nothing.
        if !matches!(inner.state, CircuitState::Closed) {
            return;
        }

        let streak_fresh = inner
            .streak_started
            .is_some_and(|started| now.duration_since(started) <= self.config.failure_window);
        if streak_fresh {
            inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        } else {
            inner.consecutive_failures = 1;
            inner.streak_started = Some(now);
        }

        if inner.consecutive_failures >= self.config.failure_threshold {
            inner.state = CircuitState::Open {
                until: now + self.config.cooldown,
            };
            inner.consecutive_failures = 0;
            inner.streak_started = None;
            warn!(
                cooldown_secs = self.config.cooldown.as_secs(),
                "credential store breaker opened"
            );
        }
    }

    fn release_probe(&self) {
        let mut inner = self.inner.lock();
        inner.probe_in_flight = false;
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

/// Admission to call the guarded resource. Record the outcome with
/// [`Permit::success`] or [`Permit::failure`]; dropping it unsettled frees
/// the probe slot without changing state.
#[derive(Debug)]
pub struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    settled: bool,
}

impl Permit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success(self.probe);
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.probe);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe();
        }
    }
}
