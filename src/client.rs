//! Client for services that need to verify a bearer token against this one.
//!
//! It posts the token to `/auth/verify` and returns the user behind it.

use crate::{store::User, APP_USER_AGENT};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};
use url::Url;

#[derive(Debug, Error)]
pub enum RemoteVerifyError {
    /// The auth service answered 400 or 401.
    #[error("token rejected: {0}")]
    Rejected(String),
    #[error("auth service unavailable")]
    Unavailable,
    #[error("unexpected status from auth service: {0}")]
    UnexpectedStatus(StatusCode),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid auth service url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    token: &'a str,
}

#[derive(Deserialize)]
struct VerifyEnvelope {
    data: VerifyData,
}

#[derive(Deserialize)]
struct VerifyData {
    user: User,
}

#[derive(Deserialize)]
struct FailureEnvelope {
    message: String,
}

#[derive(Clone, Debug)]
pub struct RemoteVerifier {
    client: Client,
    verify_url: Url,
}

impl RemoteVerifier {
    /// `base_url` is the auth service root, e.g. `http://auth:3001` or
    /// `http://gateway/auth-svc/`. A path prefix is kept; the trailing slash
    /// is optional.
    ///
    /// # Errors
    /// Returns an error if the url is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteVerifyError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let verify_url = base.join("auth/verify")?;
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .timeout(timeout)
            .build()?;
        Ok(Self { client, verify_url })
    }

    /// Resolve `token` to its user.
    ///
    /// # Errors
    /// `Rejected` for 400/401, `Unavailable` for 503, `UnexpectedStatus`
    /// otherwise, `Transport` when the request could not complete.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<User, RemoteVerifyError> {
        let response = self
            .client
            .post(self.verify_url.clone())
            .json(&VerifyBody { token })
            .send()
            .await?;

        let status = response.status();
        debug!(status = status.as_u16(), "verify response");

        match status {
            StatusCode::OK => {
                let envelope: VerifyEnvelope = response.json().await?;
                Ok(envelope.data.user)
            }
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                let message = response
                    .json::<FailureEnvelope>()
                    .await
                    .map_or_else(|_| status.to_string(), |body| body.message);
                Err(RemoteVerifyError::Rejected(message))
            }
            StatusCode::SERVICE_UNAVAILABLE => Err(RemoteVerifyError::Unavailable),
            other => Err(RemoteVerifyError::UnexpectedStatus(other)),
        }
    }
}
