use super::{MessageResponse, UserResponse};
use crate::auth::{gate::ensure_owner, AuthContext, AuthState};
use axum::{
    extract::{Extension, Path},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

#[utoipa::path(
    get,
    path= "/auth/users/{id}",
    params(("id" = String, Path, description = "User id, must be the caller's own")),
    responses (
        (status = 200, description = "User record", body = UserResponse),
        (status = 400, description = "Malformed user id", body = MessageResponse),
        (status = 403, description = "Not the caller's account", body = MessageResponse),
    ),
    security(("bearer" = [])),
    tag= "auth"
)]
pub async fn user(
    state: Extension<Arc<AuthState>>,
    Extension(context): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Response {
    let user_id = match ensure_owner(&context, &id) {
        Ok(user_id) => user_id,
        Err(err) => return err.into_response(),
    };

    match state.service().find_user(user_id).await {
        Ok(user) => Json(UserResponse::new(user, None)).into_response(),
        Err(err) => err.into_response(),
    }
}
