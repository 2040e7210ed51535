use super::{MessageResponse, UserResponse};
use crate::auth::{AuthContext, AuthState};
use axum::{
    extract::Extension,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::instrument;

#[utoipa::path(
    get,
    path= "/auth/me",
    responses (
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Missing or invalid credentials", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
pub async fn me(Extension(context): Extension<AuthContext>) -> Json<UserResponse> {
    Json(UserResponse::new(context.user, None))
}

#[utoipa::path(
    delete,
    path= "/auth/me",
    responses (
        (status = 200, description = "Account deleted", body = MessageResponse),
        (status = 401, description = "Missing or invalid credentials", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
#[instrument(skip_all, fields(user_id = %context.user.id))]
pub async fn delete_me(
    state: Extension<Arc<AuthState>>,
    Extension(context): Extension<AuthContext>,
) -> Response {
    match state.service().delete_account(context.user.id).await {
        Ok(()) => Json(MessageResponse::ok("Account deleted")).into_response(),
        Err(err) => err.into_response(),
    }
}
