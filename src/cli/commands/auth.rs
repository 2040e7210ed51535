use crate::auth::{breaker, cache, lockout, token};
use clap::{Arg, ArgMatches, Command};
use secrecy::{ExposeSecret, SecretString};

pub const ARG_JWT_SECRET: &str = "jwt-secret";
pub const ARG_JWT_ISSUER: &str = "jwt-issuer";
pub const ARG_JWT_AUDIENCE: &str = "jwt-audience";
pub const ARG_JWT_EXPIRES_IN_SECONDS: &str = "jwt-expires-in-seconds";
pub const ARG_CACHE_TTL_SECONDS: &str = "cache-ttl-seconds";
pub const ARG_CACHE_SWEEP_SECONDS: &str = "cache-sweep-seconds";
pub const ARG_LOCKOUT_THRESHOLD: &str = "lockout-threshold";
pub const ARG_LOCKOUT_SECONDS: &str = "lockout-seconds";
pub const ARG_STORE_FAILURE_THRESHOLD: &str = "store-failure-threshold";
pub const ARG_STORE_FAILURE_WINDOW_SECONDS: &str = "store-failure-window-seconds";
pub const ARG_STORE_COOLDOWN_SECONDS: &str = "store-cooldown-seconds";

/// HS256 keys shorter than this are refused at startup.
pub const MIN_SECRET_BYTES: usize = 32;

/// Upper bound for every `*-seconds` flag (ten years). Larger values would
/// overflow timer arithmetic.
pub const MAX_DURATION_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

#[derive(Debug)]
pub struct Options {
    pub jwt_secret: SecretString,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub jwt_expires_in_seconds: u64,
    pub cache: CacheOptions,
    pub lockout: LockoutOptions,
    pub store: StoreOptions,
}

#[derive(Debug, Clone, Copy)]
pub struct CacheOptions {
    pub ttl_seconds: u64,
    pub sweep_seconds: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct LockoutOptions {
    pub threshold: u32,
    pub seconds: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    pub failure_threshold: u32,
    pub failure_window_seconds: u64,
    pub cooldown_seconds: u64,
}

impl Options {
    /// Parse token, cache, lockout and store-guard arguments from matches.
    ///
    /// # Errors
    /// Returns an error if the signing secret is missing or shorter than
    /// [`MIN_SECRET_BYTES`].
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let secret = matches
            .get_one::<String>(ARG_JWT_SECRET)
            .filter(|v| !v.trim().is_empty())
            .map(|v| SecretString::from(v.clone()))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --{ARG_JWT_SECRET}"))?;

        if secret.expose_secret().len() < MIN_SECRET_BYTES {
            anyhow::bail!("--{ARG_JWT_SECRET} must be at least {MIN_SECRET_BYTES} bytes");
        }

        let get_string = |id: &str, default: &str| {
            matches
                .get_one::<String>(id)
                .cloned()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| default.to_string())
        };
        let get_u64 = |id: &str| matches.get_one::<u64>(id).copied();
        let get_u32 = |id: &str| matches.get_one::<u32>(id).copied();

        Ok(Self {
            jwt_secret: secret,
            jwt_issuer: get_string(ARG_JWT_ISSUER, token::DEFAULT_ISSUER),
            jwt_audience: get_string(ARG_JWT_AUDIENCE, token::DEFAULT_AUDIENCE),
            jwt_expires_in_seconds: get_u64(ARG_JWT_EXPIRES_IN_SECONDS)
                .unwrap_or(token::DEFAULT_EXPIRES_IN.as_secs()),
            cache: CacheOptions {
                ttl_seconds: get_u64(ARG_CACHE_TTL_SECONDS)
                    .unwrap_or(cache::DEFAULT_TTL.as_secs()),
                sweep_seconds: get_u64(ARG_CACHE_SWEEP_SECONDS)
                    .unwrap_or(cache::DEFAULT_SWEEP_INTERVAL.as_secs()),
            },
            lockout: LockoutOptions {
                threshold: get_u32(ARG_LOCKOUT_THRESHOLD).unwrap_or(lockout::DEFAULT_THRESHOLD),
                seconds: get_u64(ARG_LOCKOUT_SECONDS).unwrap_or(lockout::DEFAULT_WINDOW.as_secs()),
            },
            store: StoreOptions {
                failure_threshold: get_u32(ARG_STORE_FAILURE_THRESHOLD)
                    .unwrap_or(breaker::DEFAULT_FAILURE_THRESHOLD),
                failure_window_seconds: get_u64(ARG_STORE_FAILURE_WINDOW_SECONDS)
                    .unwrap_or(breaker::DEFAULT_FAILURE_WINDOW.as_secs()),
                cooldown_seconds: get_u64(ARG_STORE_COOLDOWN_SECONDS)
                    .unwrap_or(breaker::DEFAULT_COOLDOWN.as_secs()),
            },
        })
    }
}

pub fn with_args(command: Command) -> Command {
    let command = with_jwt_args(command);
    let command = with_cache_args(command);
    let command = with_lockout_args(command);
    with_store_guard_args(command)
}

fn with_jwt_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_JWT_SECRET)
                .long(ARG_JWT_SECRET)
                .help("HS256 signing secret, at least 32 bytes")
                .env("TODO_AUTH_JWT_SECRET")
                .hide_env_values(true)
                .required(true),
        )
        .arg(
            Arg::new(ARG_JWT_ISSUER)
                .long(ARG_JWT_ISSUER)
                .help("Issuer claim written to and required on tokens")
                .env("TODO_AUTH_JWT_ISSUER")
                .default_value(token::DEFAULT_ISSUER),
        )
        .arg(
            Arg::new(ARG_JWT_AUDIENCE)
                .long(ARG_JWT_AUDIENCE)
                .help("Audience claim written to and required on tokens")
                .env("TODO_AUTH_JWT_AUDIENCE")
                .default_value(token::DEFAULT_AUDIENCE),
        )
        .arg(
            Arg::new(ARG_JWT_EXPIRES_IN_SECONDS)
                .long(ARG_JWT_EXPIRES_IN_SECONDS)
                .help("Token lifetime in seconds")
                .env("TODO_AUTH_JWT_EXPIRES_IN_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_DURATION_SECONDS)),
        )
}

fn with_cache_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_CACHE_TTL_SECONDS)
                .long(ARG_CACHE_TTL_SECONDS)
                .help("How long a resolved user is served from memory")
                .env("TODO_AUTH_CACHE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_DURATION_SECONDS)),
        )
        .arg(
            Arg::new(ARG_CACHE_SWEEP_SECONDS)
                .long(ARG_CACHE_SWEEP_SECONDS)
                .help("Interval between purges of expired cache entries")
                .env("TODO_AUTH_CACHE_SWEEP_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_DURATION_SECONDS)),
        )
}

fn with_lockout_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_LOCKOUT_THRESHOLD)
                .long(ARG_LOCKOUT_THRESHOLD)
                .help("Consecutive failed logins before the account is locked")
                .env("TODO_AUTH_LOCKOUT_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_LOCKOUT_SECONDS)
                .long(ARG_LOCKOUT_SECONDS)
                .help("Lock duration in seconds")
                .env("TODO_AUTH_LOCKOUT_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_DURATION_SECONDS)),
        )
}

fn with_store_guard_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_STORE_FAILURE_THRESHOLD)
                .long(ARG_STORE_FAILURE_THRESHOLD)
                .help("Store outages within the window that open the circuit")
                .env("TODO_AUTH_STORE_FAILURE_THRESHOLD")
                .default_value("5")
                .value_parser(clap::value_parser!(u32).range(1..)),
        )
        .arg(
            Arg::new(ARG_STORE_FAILURE_WINDOW_SECONDS)
                .long(ARG_STORE_FAILURE_WINDOW_SECONDS)
                .help("Window in seconds over which store outages are counted")
                .env("TODO_AUTH_STORE_FAILURE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_DURATION_SECONDS)),
        )
        .arg(
            Arg::new(ARG_STORE_COOLDOWN_SECONDS)
                .long(ARG_STORE_COOLDOWN_SECONDS)
                .help("Seconds the circuit stays open before a probe is allowed")
                .env("TODO_AUTH_STORE_COOLDOWN_SECONDS")
                .default_value("30")
                .value_parser(clap::value_parser!(u64).range(1..=MAX_DURATION_SECONDS)),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn parse(args: &[&str]) -> anyhow::Result<Options> {
        let mut argv = vec!["todo-auth"];
        argv.extend_from_slice(args);
        let matches = with_args(Command::new("todo-auth")).try_get_matches_from(argv)?;
        Options::parse(&matches)
    }

    fn cleared_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("TODO_AUTH_JWT_SECRET", None::<&str>),
                ("TODO_AUTH_JWT_ISSUER", None),
                ("TODO_AUTH_JWT_AUDIENCE", None),
                ("TODO_AUTH_JWT_EXPIRES_IN_SECONDS", None),
                ("TODO_AUTH_CACHE_TTL_SECONDS", None),
                ("TODO_AUTH_CACHE_SWEEP_SECONDS", None),
                ("TODO_AUTH_STORE_FAILURE_WINDOW_SECONDS", None),
                ("TODO_AUTH_STORE_COOLDOWN_SECONDS", None),
                ("TODO_AUTH_LOCKOUT_THRESHOLD", None),
                ("TODO_AUTH_LOCKOUT_SECONDS", None),
            ],
            f,
        );
    }

    #[test]
    fn defaults_are_applied() {
        cleared_env(|| {
            let options = parse(&["--jwt-secret", SECRET]).expect("valid arguments");
            assert_eq!(options.jwt_issuer, token::DEFAULT_ISSUER);
            assert_eq!(options.jwt_audience, token::DEFAULT_AUDIENCE);
            assert_eq!(options.jwt_expires_in_seconds, 604_800);
            assert_eq!(options.cache.ttl_seconds, 300);
            assert_eq!(options.lockout.threshold, 5);
            assert_eq!(options.lockout.seconds, 900);
            assert_eq!(options.store.cooldown_seconds, 30);
        });
    }

    #[test]
    fn short_secret_is_rejected() {
        cleared_env(|| {
            let err = parse(&["--jwt-secret", "too-short"]).expect_err("short secret");
            assert!(err.to_string().contains("at least 32 bytes"));
        });
    }

    #[test]
    fn secret_is_required() {
        cleared_env(|| {
            assert!(parse(&[]).is_err());
        });
    }

    #[test]
    fn zero_lockout_threshold_is_rejected() {
        cleared_env(|| {
            assert!(parse(&["--jwt-secret", SECRET, "--lockout-threshold", "0"]).is_err());
        });
    }

    #[test]
    fn oversized_durations_are_rejected() {
        cleared_env(|| {
            let max = u64::MAX.to_string();
            for flag in [
                "--jwt-expires-in-seconds",
                "--cache-ttl-seconds",
                "--cache-sweep-seconds",
                "--lockout-seconds",
                "--store-failure-window-seconds",
                "--store-cooldown-seconds",
            ] {
                assert!(
                    parse(&["--jwt-secret", SECRET, flag, &max]).is_err(),
                    "{flag} accepted u64::MAX"
                );
            }

            let ten_years = MAX_DURATION_SECONDS.to_string();
            let options = parse(&["--jwt-secret", SECRET, "--store-cooldown-seconds", &ten_years])
                .expect("ten years is accepted");
            assert_eq!(options.store.cooldown_seconds, MAX_DURATION_SECONDS);
        });
    }

    #[test]
    fn env_overrides_defaults() {
        temp_env::with_vars(
            [
                ("TODO_AUTH_JWT_SECRET", Some(SECRET)),
                ("TODO_AUTH_JWT_ISSUER", Some("issuer.test")),
                ("TODO_AUTH_LOCKOUT_THRESHOLD", Some("3")),
                ("TODO_AUTH_CACHE_TTL_SECONDS", Some("10")),
            ],
            || {
                let options = parse(&[]).expect("valid env");
                assert_eq!(options.jwt_secret.expose_secret(), SECRET);
                assert_eq!(options.jwt_issuer, "issuer.test");
                assert_eq!(options.lockout.threshold, 3);
                assert_eq!(options.cache.ttl_seconds, 10);
            },
        );
    }
}
