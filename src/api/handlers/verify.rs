use super::{MessageResponse, UserResponse};
use crate::auth::AuthState;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize)]
pub struct VerifyRequest {
    #[serde(default)]
    token: Option<String>,
}

#[utoipa::path(
    post,
    path= "/auth/verify",
    request_body = VerifyRequest,
    responses (
        (status = 200, description = "Token is valid", body = UserResponse),
        (status = 400, description = "Token is required", body = MessageResponse),
        (status = 401, description = "Token or subject rejected", body = MessageResponse),
        (status = 503, description = "Credential store unavailable", body = MessageResponse),
    ),
    tag= "auth"
)]
/// Run the gate on a token sent in the body, for services that only hold the
/// token and need the user behind it.
#[instrument(skip_all)]
pub async fn verify(
    state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyRequest>>,
) -> Response {
    let token = payload
        .and_then(|Json(request)| request.token)
        .filter(|token| !token.trim().is_empty());

    let Some(token) = token else {
        return (
            StatusCode::BAD_REQUEST,
            Json(MessageResponse::failure("Token is required")),
        )
            .into_response();
    };

    match state.authenticate_token(token).await {
        Ok(context) => {
            Json(UserResponse::new(context.user, Some("Token is valid"))).into_response()
        }
        Err(err) => err.into_response(),
    }
}
