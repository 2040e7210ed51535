//! Bearer token issuance and verification (HS256).

use super::AuthError;
use crate::store::{User, UserId};
use chrono::{DateTime, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ISSUER: &str = "todo-app-auth-service";
pub const DEFAULT_AUDIENCE: &str = "todo-app-users";
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Identity embedded in a token at issuance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
}

impl From<&User> for TokenSubject {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

/// Decoded claim set. The identity fields are a snapshot from issuance time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub user_id: UserId,
    pub email: String,
    pub username: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    expires_in: Duration,
    validation: Validation,
}

impl TokenService {
    #[must_use]
    pub fn new(secret: &SecretString, issuer: &str, audience: &str, expires_in: Duration) -> Self {
        let key = secret.expose_secret().as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            expires_in,
            validation,
        }
    }

    #[must_use]
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Sign a token for `subject`, valid from now.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if signing fails.
    pub fn issue(&self, subject: &TokenSubject) -> Result<String, AuthError> {
        self.issue_at(subject, Utc::now())
    }

    /// Sign a token as if issued at `issued_at`.
    ///
    /// # Errors
    /// Returns [`AuthError::Internal`] if signing fails.
    pub fn issue_at(
        &self,
        subject: &TokenSubject,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let lifetime = i64::try_from(self.expires_in.as_secs()).unwrap_or(i64::MAX);
        let iat = issued_at.timestamp();
        let claims = TokenClaims {
            user_id: subject.user_id,
            email: subject.email.clone(),
            username: subject.username.clone(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat,
            exp: iat.saturating_add(lifetime),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::internal("token.issue", err.to_string()))
    }

    /// Check signature, algorithm, issuer, audience and expiry (no leeway).
    ///
    /// # Errors
    /// `MalformedToken`, `InvalidSignature` or `Expired` depending on what failed.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::MalformedToken);
        }

        decode::<TokenClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                debug!("token rejected: {err}");
                match err.kind() {
                    ErrorKind::ExpiredSignature => AuthError::Expired,
                    ErrorKind::InvalidSignature
                    | ErrorKind::InvalidIssuer
                    | ErrorKind::InvalidAudience
                    | ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
                    _ => AuthError::MalformedToken,
                }
            })
    }
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}
