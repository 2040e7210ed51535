//! # todo-auth
//!
//! Authentication and session-trust service for the todo application.
//!
//! - [`store`]: credential store contract with Postgres and in-memory backends.
//! - [`auth`]: password hashing, lockout policy, JWT issue/verify, user cache,
//!   request gate and the account use cases.
//! - [`api`]: axum routes exposing the use cases over HTTP.
//! - [`client`]: verifier used by other services to check a bearer token.

pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod store;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub static APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
