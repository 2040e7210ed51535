use crate::{
    api,
    auth::{breaker::BreakerConfig, AuthConfig, AuthState},
    store::{CredentialStore, MemoryStore, PgStore},
};
use anyhow::{Context, Result};
use axum::http::HeaderValue;
use secrecy::SecretString;
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tracing::{info, warn};
use url::Url;

#[derive(Debug)]
pub enum StoreBackend {
    Postgres { dsn: String },
    Memory,
}

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub store: StoreBackend,
    pub cors_origins: Vec<HeaderValue>,
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expires_in_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_sweep_seconds: u64,
    pub lockout_threshold: u32,
    pub lockout_seconds: u64,
    pub store_failure_threshold: u32,
    pub store_failure_window_seconds: u64,
    pub store_cooldown_seconds: u64,
}

impl Args {
    fn auth_config(&self) -> AuthConfig {
        AuthConfig::new(self.jwt_secret.clone())
            .with_jwt_issuer(self.jwt_issuer.clone())
            .with_jwt_audience(self.jwt_audience.clone())
            .with_token_expires_in(Duration::from_secs(self.jwt_expires_in_seconds))
            .with_cache_ttl(Duration::from_secs(self.cache_ttl_seconds))
            .with_sweep_interval(Duration::from_secs(self.cache_sweep_seconds))
            .with_lockout(
                self.lockout_threshold,
                Duration::from_secs(self.lockout_seconds),
            )
            .with_breaker(BreakerConfig {
                failure_threshold: self.store_failure_threshold,
                failure_window: Duration::from_secs(self.store_failure_window_seconds),
                cooldown: Duration::from_secs(self.store_cooldown_seconds),
            })
    }
}

/// Execute the server action.
/// # Errors
/// Returns an error if the database cannot be reached or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let store: Arc<dyn CredentialStore> = match &args.store {
        StoreBackend::Postgres { dsn } => {
            let dsn = Url::parse(dsn).context("invalid database DSN")?;

            let pool = PgPoolOptions::new()
                .min_connections(1)
                .max_connections(5)
                .max_lifetime(Duration::from_secs(60 * 2))
                .test_before_acquire(true)
                .connect(dsn.as_str())
                .await
                .context("Failed to connect to database")?;

            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("using the in-memory credential store, accounts are lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    let config = args.auth_config();
    let state = Arc::new(AuthState::new(&config, store));

    api::new(args.port, state, args.cors_origins, config.sweep_interval()).await
}

fn log_startup_args(args: &Args) {
    let store = match &args.store {
        StoreBackend::Postgres { dsn } => redact_dsn(dsn),
        StoreBackend::Memory => "memory".to_string(),
    };
    let origins = args
        .cors_origins
        .iter()
        .filter_map(|origin| origin.to_str().ok())
        .collect::<Vec<_>>()
        .join(",");
    let entries = [
        ("listen", format!("tcp:{}", args.port)),
        ("store", store),
        ("cors_origins", origins),
        ("jwt_issuer", args.jwt_issuer.clone()),
        ("jwt_audience", args.jwt_audience.clone()),
        ("jwt_expires_in", format!("{}s", args.jwt_expires_in_seconds)),
        ("cache_ttl", format!("{}s", args.cache_ttl_seconds)),
        (
            "lockout",
            format!("{} attempts / {}s", args.lockout_threshold, args.lockout_seconds),
        ),
        (
            "store_breaker",
            format!(
                "{} failures / {}s, cooldown {}s",
                args.store_failure_threshold,
                args.store_failure_window_seconds,
                args.store_cooldown_seconds
            ),
        ),
    ];

    let max_key_len = entries.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    let mut message = format!(
        "{} {} - {}\n\nStartup configuration:",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        short_commit(crate::GIT_COMMIT_HASH)
    );
    for (key, value) in &entries {
        let padding = " ".repeat(max_key_len.saturating_sub(key.len()));
        let _ =
            std::fmt::Write::write_fmt(&mut message, format_args!("\n  {key}:{padding} {value}"));
    }
    info!("{message}");
}

fn redact_dsn(dsn: &str) -> String {
    match Url::parse(dsn) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("REDACTED"));
            }
            parsed.to_string()
        }
        Err(_) => "invalid-dsn".to_string(),
    }
}

fn short_commit(hash: &str) -> &str {
    let trimmed = hash.trim();
    trimmed.get(..7).unwrap_or(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redact_dsn_hides_password() {
        assert_eq!(
            redact_dsn("postgres://todo:hunter2@db:5432/todo"),
            "postgres://todo:REDACTED@db:5432/todo"
        );
        assert_eq!(
            redact_dsn("postgres://todo@db:5432/todo"),
            "postgres://todo@db:5432/todo"
        );
        assert_eq!(redact_dsn("not a dsn"), "invalid-dsn");
    }

    #[test]
    fn short_commit_truncates() {
        assert_eq!(short_commit("0123456789abcdef"), "0123456");
        assert_eq!(short_commit("abc"), "abc");
    }

    #[test]
    fn auth_config_carries_arguments() {
        let args = Args {
            port: 8080,
            store: StoreBackend::Memory,
            cors_origins: Vec::new(),
            jwt_secret: SecretString::from("0123456789abcdef0123456789abcdef"),
            jwt_issuer: "issuer".to_string(),
            jwt_audience: "audience".to_string(),
            jwt_expires_in_seconds: 60,
            cache_ttl_seconds: 10,
            cache_sweep_seconds: 20,
            lockout_threshold: 3,
            lockout_seconds: 30,
            store_failure_threshold: 2,
            store_failure_window_seconds: 5,
            store_cooldown_seconds: 1,
        };
        let config = args.auth_config();
        assert_eq!(config.sweep_interval(), Duration::from_secs(20));
        assert_eq!(config.token_expires_in(), Duration::from_secs(60));
    }
}
