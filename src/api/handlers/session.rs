use crate::{auth::AuthContext, store::User};
use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionStatus {
    authenticated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user: Option<User>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    success: bool,
    data: SessionStatus,
}

#[utoipa::path(
    get,
    path= "/auth/session",
    responses (
        (status = 200, description = "Identity when a valid token was presented", body = SessionResponse),
    ),
    tag= "auth"
)]
/// Never rejects. Identity is attached only when the token passes the gate.
pub async fn session(context: Option<Extension<AuthContext>>) -> Json<SessionResponse> {
    let user = context.map(|Extension(context)| context.user);
    Json(SessionResponse {
        success: true,
        data: SessionStatus {
            authenticated: user.is_some(),
            user,
        },
    })
}
