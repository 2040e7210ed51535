//! Request gate: bearer token to resolved identity.
//!
//! Order of checks: token present, token valid, user exists, user active,
//! user not locked. Inactive and locked users are evicted from the cache
//! before rejecting so the next request reads the store again.

use super::{token::TokenClaims, AuthError, AuthState};
use crate::store::{CredentialStore, ParseUserIdError, User, UserId};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, Span};

/// Identity attached to a request that passed the gate.
#[derive(Clone, Debug)]
pub struct AuthContext {
    pub user: User,
    pub token: String,
    pub claims: TokenClaims,
}

/// Read the token from `Authorization`. The `Bearer` scheme is matched
/// case-insensitively; a value without it is taken as the raw token.
///
/// # Errors
/// `NoToken` when the header is absent, `MalformedToken` when it is empty or
/// not valid header text.
pub fn extract_bearer(headers: &HeaderMap) -> Result<String, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::NoToken)?;
    let value = value.to_str().map_err(|_| AuthError::MalformedToken)?.trim();
    let rest = value
        .get(..6)
        .filter(|scheme| scheme.eq_ignore_ascii_case("bearer"))
        .and_then(|_| value.get(6..));
    let token = match rest {
        // "Bearer" alone, or followed by whitespace, is the scheme.
        Some(rest) if rest.is_empty() || rest.starts_with(char::is_whitespace) => rest.trim(),
        _ => value,
    };

    if token.is_empty() {
        Err(AuthError::MalformedToken)
    } else {
        Ok(token.to_string())
    }
}

impl AuthState {
    /// Run the gate against request headers.
    ///
    /// # Errors
    /// Any gate failure kind, or `CredentialStoreUnavailable` when the user
    /// could not be loaded.
    #[instrument(skip_all, fields(user_id))]
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let token = extract_bearer(headers)?;
        self.authenticate_token(token).await
    }

    /// Same checks as [`authenticate`](Self::authenticate) for a bare token.
    ///
    /// # Errors
    /// See [`authenticate`](Self::authenticate).
    pub async fn authenticate_token(&self, token: String) -> Result<AuthContext, AuthError> {
        let claims = self.tokens().verify(&token)?;
        let user_id = claims.user_id;
        Span::current().record("user_id", user_id.get());

        let user = self.resolve_user(user_id).await?;

        if !user.is_active {
            self.cache().invalidate(user_id).await;
            return Err(AuthError::UserInactive);
        }

        if self.lockout().is_locked(&user, Utc::now()) {
            self.cache().invalidate(user_id).await;
            return Err(AuthError::AccountLocked);
        }

        Ok(AuthContext {
            user,
            token,
            claims,
        })
    }

    /// Gate variant that never rejects: failures yield `None`.
    pub async fn authenticate_optional(&self, headers: &HeaderMap) -> Option<AuthContext> {
        match self.authenticate(headers).await {
            Ok(context) => Some(context),
            Err(err) => {
                debug!("continuing without identity: {err}");
                None
            }
        }
    }

    /// Cache first, then the store. Tombstoned records are absent.
    pub(crate) async fn resolve_user(&self, id: UserId) -> Result<User, AuthError> {
        if let Some(user) = self.cache().get(id).await {
            return Ok(user);
        }

        let record = self
            .store()
            .find_by_id(id)
            .await
            .map_err(|err| AuthError::from_store("gate.resolve_user", err))?
            .ok_or(AuthError::UserNotFound)?;

        self.cache().set(id, record.user.clone()).await;
        Ok(record.user)
    }
}

/// Parse an identifier taken from a path, query or body and require that it
/// belongs to the caller.
///
/// # Errors
/// `Validation` for missing or ambiguous ids, `Forbidden` for someone else's.
pub fn ensure_owner(context: &AuthContext, raw_id: &str) -> Result<UserId, AuthError> {
    let id: UserId = raw_id.parse().map_err(|err: ParseUserIdError| {
        AuthError::Validation(vec![format!("Invalid user id: {err}")])
    })?;

    if id == context.user.id {
        Ok(id)
    } else {
        Err(AuthError::Forbidden)
    }
}

/// Middleware rejecting requests that fail the gate.
pub async fn require_identity(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    match state.authenticate(request.headers()).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(err) => err.into_response(),
    }
}

/// Middleware attaching identity when available and never rejecting.
pub async fn optional_identity(
    State(state): State<Arc<AuthState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(context) = state.authenticate_optional(request.headers()).await {
        request.extensions_mut().insert(context);
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{test_support, token::TokenSubject},
        store::{LoginState, NewUser, PasswordDigest},
    };
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(value) {
            headers.insert(AUTHORIZATION, value);
        }
        headers
    }

    async fn seeded() -> Result<(Arc<crate::store::MemoryStore>, AuthState, User), AuthError> {
        let (memory, state) = test_support::state();
        let record = memory
            .create(NewUser {
                username: "alice".to_string(),
                email: "a@x.com".to_string(),
                first_name: None,
                last_name: None,
                password_hash: PasswordDigest::from_phc("$argon2id$x".to_string()),
            })
            .await
            .map_err(|err| AuthError::from_store("test", err))?;
        Ok((memory, state, record.user))
    }

    fn bearer(state: &AuthState, user: &User) -> Result<HeaderMap, AuthError> {
        let token = state.tokens().issue(&TokenSubject::from(user))?;
        Ok(headers(&format!("Bearer {token}")))
    }

    #[test]
    fn extract_bearer_variants() {
        assert!(matches!(
            extract_bearer(&HeaderMap::new()),
            Err(AuthError::NoToken)
        ));
        assert!(matches!(
            extract_bearer(&headers("Bearer ")),
            Err(AuthError::MalformedToken)
        ));
        assert_eq!(extract_bearer(&headers("Bearer abc")).ok(), Some("abc".to_string()));
        assert_eq!(extract_bearer(&headers("bearer abc")).ok(), Some("abc".to_string()));
        assert_eq!(extract_bearer(&headers("BEARER abc")).ok(), Some("abc".to_string()));
        assert_eq!(extract_bearer(&headers("bEaReR abc")).ok(), Some("abc".to_string()));
        assert_eq!(extract_bearer(&headers("Bearerabc")).ok(), Some("Bearerabc".to_string()));
        // No prefix: the whole value is the token.
        assert_eq!(extract_bearer(&headers("abc")).ok(), Some("abc".to_string()));
    }

    #[tokio::test]
    async fn valid_token_resolves_identity() -> Result<(), AuthError> {
        let (_memory, state, alice) = seeded().await?;
        let context = state.authenticate(&bearer(&state, &alice)?).await?;
        assert_eq!(context.user.id, alice.id);
        assert_eq!(context.claims.email, "a@x.com");
        assert!(state.cache().get(alice.id).await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn token_failures_propagate_their_kind() -> Result<(), AuthError> {
        let (_memory, state, _alice) = seeded().await?;
        assert!(matches!(
            state.authenticate(&HeaderMap::new()).await,
            Err(AuthError::NoToken)
        ));
        assert!(matches!(
            state.authenticate(&headers("Bearer nonsense")).await,
            Err(AuthError::MalformedToken)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_or_deleted_user_is_not_found() -> Result<(), AuthError> {
        let (memory, state, alice) = seeded().await?;
        let headers = bearer(&state, &alice)?;
        memory
            .soft_delete(alice.id)
            .await
            .map_err(|err| AuthError::from_store("test", err))?;

        assert!(matches!(
            state.authenticate(&headers).await,
            Err(AuthError::UserNotFound)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn inactive_user_is_rejected_and_evicted() -> Result<(), AuthError> {
        let (memory, state, alice) = seeded().await?;
        let headers = bearer(&state, &alice)?;
        memory
            .set_active(alice.id, false)
            .await
            .map_err(|err| AuthError::from_store("test", err))?;

        assert!(matches!(
            state.authenticate(&headers).await,
            Err(AuthError::UserInactive)
        ));
        assert!(state.cache().get(alice.id).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn locked_user_is_rejected_and_evicted() -> Result<(), AuthError> {
        let (memory, state, alice) = seeded().await?;
        let headers = bearer(&state, &alice)?;
        memory
            .update_login_state(
                alice.id,
                LoginState {
                    login_attempts: 5,
                    locked_until: Some(Utc::now() + chrono::Duration::minutes(15)),
                    last_login_at: None,
                },
            )
            .await
            .map_err(|err| AuthError::from_store("test", err))?;

        assert!(matches!(
            state.authenticate(&headers).await,
            Err(AuthError::AccountLocked)
        ));
        assert!(state.cache().get(alice.id).await.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn expired_lock_is_not_locked() -> Result<(), AuthError> {
        let (memory, state, alice) = seeded().await?;
        let headers = bearer(&state, &alice)?;
        memory
            .update_login_state(
                alice.id,
                LoginState {
                    login_attempts: 5,
                    locked_until: Some(Utc::now() - chrono::Duration::seconds(1)),
                    last_login_at: None,
                },
            )
            .await
            .map_err(|err| AuthError::from_store("test", err))?;

        assert!(state.authenticate(&headers).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn optional_gate_swallows_failures() -> Result<(), AuthError> {
        let (_memory, state, alice) = seeded().await?;
        assert!(state.authenticate_optional(&HeaderMap::new()).await.is_none());
        assert!(state
            .authenticate_optional(&headers("Bearer nonsense"))
            .await
            .is_none());
        assert!(state
            .authenticate_optional(&bearer(&state, &alice)?)
            .await
            .is_some());
        Ok(())
    }

    #[tokio::test]
    async fn store_outage_is_unavailable() -> Result<(), AuthError> {
        let (memory, state, alice) = seeded().await?;
        let headers = bearer(&state, &alice)?;
        memory.set_unavailable(true);
        assert!(matches!(
            state.authenticate(&headers).await,
            Err(AuthError::CredentialStoreUnavailable)
        ));
        Ok(())
    }

    #[tokio::test]
    async fn ownership_is_checked_on_typed_ids() -> Result<(), AuthError> {
        let (_memory, state, alice) = seeded().await?;
        let context = state.authenticate(&bearer(&state, &alice)?).await?;

        assert_eq!(ensure_owner(&context, "1").ok(), Some(alice.id));
        assert!(matches!(ensure_owner(&context, "2"), Err(AuthError::Forbidden)));
        for raw in ["", "01", "1abc", " 1", "-1"] {
            assert!(
                matches!(ensure_owner(&context, raw), Err(AuthError::Validation(_))),
                "{raw:?} should be a validation error"
            );
        }
        Ok(())
    }
}
