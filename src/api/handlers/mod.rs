pub mod account;
pub mod health;
pub mod login;
pub mod me;
pub mod register;
pub mod session;
pub mod users;
pub mod verify;

pub use self::health::health;

// common types for the handlers
use crate::{
    auth::{AuthError, Rejection},
    store::User,
};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

/// Envelope for responses that only carry a message.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl MessageResponse {
    pub fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            details: None,
        }
    }

    pub fn failure(message: &str) -> Self {
        Self {
            success: false,
            message: message.to_string(),
            details: None,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthData {
    pub user: User,
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub success: bool,
    pub message: String,
    pub data: AuthData,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserData {
    pub user: User,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: UserData,
}

impl UserResponse {
    pub fn new(user: User, message: Option<&str>) -> Self {
        Self {
            success: true,
            message: message.map(str::to_string),
            data: UserData { user },
        }
    }
}

pub(crate) fn missing_payload() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(MessageResponse::failure("Missing payload")),
    )
        .into_response()
}

/// 404 for every route the router does not know.
pub async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(MessageResponse::failure("Endpoint not found")),
    )
}

fn status(rejection: Rejection) -> StatusCode {
    match rejection {
        Rejection::MissingCredential
        | Rejection::InvalidCredential
        | Rejection::UnauthorizedSubject => StatusCode::UNAUTHORIZED,
        Rejection::BadRequest => StatusCode::BAD_REQUEST,
        Rejection::Conflict => StatusCode::CONFLICT,
        Rejection::Forbidden => StatusCode::FORBIDDEN,
        Rejection::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Rejection::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let code = status(self.rejection());
        let body = match self {
            Self::NoToken => MessageResponse::failure("Access denied. No token provided."),
            Self::MalformedToken | Self::InvalidSignature => {
                MessageResponse::failure("Access denied. Invalid token.")
            }
            Self::Expired => MessageResponse::failure("Access denied. Token has expired."),
            Self::UserNotFound | Self::UserInactive => {
                MessageResponse::failure("Access denied. User not found or inactive.")
            }
            Self::AccountLocked => MessageResponse::failure(
                "Account is temporarily locked due to multiple failed login attempts.",
            ),
            Self::InvalidCredentials => MessageResponse::failure("Invalid credentials"),
            Self::Conflict { field } => {
                MessageResponse::failure(&format!("User with this {field} already exists"))
            }
            Self::Validation(details) => MessageResponse {
                success: false,
                message: "Validation error".to_string(),
                details: Some(details),
            },
            Self::Forbidden => MessageResponse::failure(
                "Access denied. You can only access your own resources.",
            ),
            Self::CredentialStoreUnavailable => MessageResponse::failure(
                "Service temporarily unavailable, please try again later",
            ),
            Self::Internal { operation, message } => {
                error!(operation, "internal error: {message}");
                MessageResponse::failure("Internal server error")
            }
        };

        debug!(status = code.as_u16(), "request rejected: {}", body.message);
        (code, Json(body)).into_response()
    }
}
