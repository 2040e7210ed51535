use super::{missing_payload, AuthData, AuthResponse, MessageResponse};
use crate::auth::{service::Credentials, AuthError, AuthState};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    email: String,
    password: String,
}

#[utoipa::path(
    post,
    path= "/auth/login",
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Login successful", body = AuthResponse, content_type = "application/json"),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Invalid credentials", body = MessageResponse),
        (status = 423, description = "Account temporarily locked", body = MessageResponse),
        (status = 503, description = "Credential store unavailable", body = MessageResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn login(
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let credentials = Credentials {
        email: request.email,
        password: SecretString::from(request.password),
    };

    match state.service().login(credentials).await {
        Ok(session) => Json(AuthResponse {
            success: true,
            message: "Login successful".to_string(),
            data: AuthData {
                user: session.user,
                token: session.token,
            },
        })
        .into_response(),
        // Login reports the lock with its own status; the gate answers 401.
        Err(AuthError::AccountLocked) => (
            StatusCode::LOCKED,
            Json(MessageResponse::failure(
                "Account temporarily locked due to failed login attempts",
            )),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
