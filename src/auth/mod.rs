//! Authentication and session-trust core.
//!
//! [`AuthState`] is built once per process from an [`AuthConfig`] and a
//! [`CredentialStore`], then shared by `Arc`. It owns the user cache, the
//! token service, the lockout policy and the breaker-guarded store.

pub mod breaker;
pub mod cache;
mod error;
pub mod gate;
pub mod guarded;
pub mod lockout;
pub mod password;
pub mod service;
pub mod token;
pub mod validate;
pub mod writer;

pub use self::error::{AuthError, Rejection};
pub use self::gate::AuthContext;
pub use self::service::AuthService;

use self::{
    breaker::BreakerConfig,
    cache::UserCache,
    guarded::GuardedStore,
    lockout::LockoutPolicy,
    password::CredentialHasher,
    token::TokenService,
    writer::LoginStateWriter,
};
use crate::store::CredentialStore;
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};

#[derive(Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    jwt_issuer: String,
    jwt_audience: String,
    token_expires_in: Duration,
    cache_ttl: Duration,
    sweep_interval: Duration,
    lockout_threshold: u32,
    lockout_window: Duration,
    breaker: BreakerConfig,
    hasher: CredentialHasher,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            jwt_issuer: token::DEFAULT_ISSUER.to_string(),
            jwt_audience: token::DEFAULT_AUDIENCE.to_string(),
            token_expires_in: token::DEFAULT_EXPIRES_IN,
            cache_ttl: cache::DEFAULT_TTL,
            sweep_interval: cache::DEFAULT_SWEEP_INTERVAL,
            lockout_threshold: lockout::DEFAULT_THRESHOLD,
            lockout_window: lockout::DEFAULT_WINDOW,
            breaker: BreakerConfig::default(),
            hasher: CredentialHasher::new(),
        }
    }

    #[must_use]
    pub fn with_jwt_issuer(mut self, issuer: String) -> Self {
        self.jwt_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_jwt_audience(mut self, audience: String) -> Self {
        self.jwt_audience = audience;
        self
    }

    #[must_use]
    pub fn with_token_expires_in(mut self, expires_in: Duration) -> Self {
        self.token_expires_in = expires_in;
        self
    }

    #[must_use]
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub fn with_lockout(mut self, threshold: u32, window: Duration) -> Self {
        self.lockout_threshold = threshold;
        self.lockout_window = window;
        self
    }

    #[must_use]
    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    #[must_use]
    pub fn with_hasher(mut self, hasher: CredentialHasher) -> Self {
        self.hasher = hasher;
        self
    }

    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    #[must_use]
    pub fn token_expires_in(&self) -> Duration {
        self.token_expires_in
    }
}

pub struct AuthState {
    store: Arc<GuardedStore>,
    cache: Arc<UserCache>,
    tokens: TokenService,
    hasher: CredentialHasher,
    lockout: LockoutPolicy,
    writer: LoginStateWriter,
}

impl AuthState {
    /// Wire the auth core around `store`.
    ///
    /// Must run inside a Tokio runtime: the login-state writer spawns its
    /// failure logger here.
    #[must_use]
    pub fn new(config: &AuthConfig, store: Arc<dyn CredentialStore>) -> Self {
        let store = Arc::new(GuardedStore::new(store, config.breaker));
        let writer = LoginStateWriter::with_logging(store.clone());

        Self {
            store,
            cache: Arc::new(UserCache::new(config.cache_ttl)),
            tokens: TokenService::new(
                &config.jwt_secret,
                &config.jwt_issuer,
                &config.jwt_audience,
                config.token_expires_in,
            ),
            hasher: config.hasher.clone(),
            lockout: LockoutPolicy::new(config.lockout_threshold, config.lockout_window),
            writer,
        }
    }

    /// Shared cache handle. Collaborators call `invalidate` on it after any
    /// change to a user they made outside this crate.
    #[must_use]
    pub fn cache(&self) -> &Arc<UserCache> {
        &self.cache
    }

    #[must_use]
    pub fn tokens(&self) -> &TokenService {
        &self.tokens
    }

    #[must_use]
    pub fn store(&self) -> &GuardedStore {
        &self.store
    }

    #[must_use]
    pub fn lockout(&self) -> &LockoutPolicy {
        &self.lockout
    }

    #[must_use]
    pub fn service(&self) -> AuthService<'_> {
        AuthService::new(self)
    }
}
