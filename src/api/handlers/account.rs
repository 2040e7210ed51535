use super::{missing_payload, MessageResponse};
use crate::auth::{AuthContext, AuthState};
use axum::{
    extract::Extension,
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
pub struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

#[utoipa::path(
    put,
    path= "/auth/password",
    request_body = ChangePasswordRequest,
    responses (
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Validation error", body = MessageResponse),
        (status = 401, description = "Current password is wrong or token rejected", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag= "account"
)]
#[instrument(skip_all, fields(user_id = %context.user.id))]
pub async fn change_password(
    state: Extension<Arc<AuthState>>,
    Extension(context): Extension<AuthContext>,
    payload: Option<Json<ChangePasswordRequest>>,
) -> Response {
    let Some(Json(request)) = payload else {
        return missing_payload();
    };

    match state
        .service()
        .change_password(
            context.user.id,
            SecretString::from(request.current_password),
            SecretString::from(request.new_password),
        )
        .await
    {
        Ok(()) => Json(MessageResponse::ok("Password updated successfully")).into_response(),
        Err(err) => err.into_response(),
    }
}

#[utoipa::path(
    post,
    path= "/auth/deactivate",
    responses (
        (status = 200, description = "Account deactivated", body = MessageResponse),
        (status = 401, description = "Missing or invalid credentials", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag= "account"
)]
#[instrument(skip_all, fields(user_id = %context.user.id))]
pub async fn deactivate(
    state: Extension<Arc<AuthState>>,
    Extension(context): Extension<AuthContext>,
) -> Response {
    match state.service().deactivate(context.user.id).await {
        Ok(()) => Json(MessageResponse::ok("Account deactivated")).into_response(),
        Err(err) => err.into_response(),
    }
}
