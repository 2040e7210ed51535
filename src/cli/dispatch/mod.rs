//! Map validated CLI arguments to an action.

use crate::cli::actions::{
    server::{Args, StoreBackend},
    Action,
};
use crate::cli::commands::{self, auth};
use anyhow::{Context, Result};
use axum::http::HeaderValue;

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>(commands::ARG_PORT)
        .copied()
        .unwrap_or(8080);

    let store = if matches.get_flag(commands::ARG_MEMORY_STORE) {
        StoreBackend::Memory
    } else {
        let dsn = matches
            .get_one::<String>(commands::ARG_DSN)
            .cloned()
            .filter(|v| !v.trim().is_empty())
            .context("missing required argument: --dsn")?;
        StoreBackend::Postgres { dsn }
    };

    let cors_origins = matches
        .get_many::<String>(commands::ARG_CORS_ORIGIN)
        .into_iter()
        .flatten()
        .map(|origin| origin.trim())
        .filter(|origin| !origin.is_empty())
        .map(|origin| {
            HeaderValue::from_str(origin).with_context(|| format!("invalid CORS origin: {origin}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        store,
        cors_origins,
        jwt_secret: auth_opts.jwt_secret,
        jwt_issuer: auth_opts.jwt_issuer,
        jwt_audience: auth_opts.jwt_audience,
        jwt_expires_in_seconds: auth_opts.jwt_expires_in_seconds,
        cache_ttl_seconds: auth_opts.cache.ttl_seconds,
        cache_sweep_seconds: auth_opts.cache.sweep_seconds,
        lockout_threshold: auth_opts.lockout.threshold,
        lockout_seconds: auth_opts.lockout.seconds,
        store_failure_threshold: auth_opts.store.failure_threshold,
        store_failure_window_seconds: auth_opts.store.failure_window_seconds,
        store_cooldown_seconds: auth_opts.store.cooldown_seconds,
    }))
}
