use super::{missing_payload, AuthData, AuthResponse};
use crate::auth::{service::Registration, AuthState};
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
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    username: String,
    email: String,
    password: String,
    first_name: Option<String>,
    last_name: Option<String>,
}

#[utoipa::path(
    post,
    path= "/auth/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "User registered successfully", body = AuthResponse, content_type = "application/json"),
        (status = 400, description = "Validation error", body = super::MessageResponse),
        (status = 409, description = "User with the specified username or email already exists", body = super::MessageResponse),
        (status = 503, description = "Credential store unavailable", body = super::MessageResponse),
    ),
    tag= "auth"
)]
#[instrument(skip_all)]
pub async fn register(
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    let registration = Registration {
        username: request.username,
        email: request.email,
        password: SecretString::from(request.password),
        first_name: request.first_name,
        last_name: request.last_name,
    };

    match state.service().register(registration).await {
        Ok(session) => (
            StatusCode::CREATED,
            Json(AuthResponse {
                success: true,
                message: "User registered successfully".to_string(),
                data: AuthData {
                    user: session.user,
                    token: session.token,
                },
            }),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}
