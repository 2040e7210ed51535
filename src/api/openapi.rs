#![allow(clippy::needless_for_each)]

use super::handlers::{
    account, health, login, me, register, session, users, verify, AuthData, AuthResponse,
    MessageResponse, UserData, UserResponse,
};
use crate::store::User;
use axum::Json;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        register::register,
        login::login,
        verify::verify,
        me::me,
        me::delete_me,
        account::change_password,
        account::deactivate,
        users::user,
        session::session,
    ),
    components(schemas(
        health::Health,
        register::RegisterRequest,
        login::LoginRequest,
        verify::VerifyRequest,
        account::ChangePasswordRequest,
        session::SessionResponse,
        session::SessionStatus,
        User,
        AuthData,
        AuthResponse,
        UserData,
        UserResponse,
        MessageResponse,
    )),
    modifiers(&BearerAuth),
    tags(
        (name = "auth", description = "Registration, login and token verification"),
        (name = "account", description = "Credential and account lifecycle"),
        (name = "health", description = "Service status"),
    )
)]
struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    let mut doc = ApiDoc::openapi();
    doc.info.title = env!("CARGO_PKG_NAME").to_string();
    doc.info.version = env!("CARGO_PKG_VERSION").to_string();
    doc
}

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = openapi();
        for path in [
            "/health",
            "/auth/register",
            "/auth/login",
            "/auth/verify",
            "/auth/me",
            "/auth/password",
            "/auth/deactivate",
            "/auth/users/{id}",
            "/auth/session",
        ] {
            assert!(doc.paths.paths.contains_key(path), "{path} missing");
        }
        assert_eq!(doc.info.title, env!("CARGO_PKG_NAME"));
    }

    #[test]
    fn bearer_scheme_is_registered() {
        let doc = openapi();
        let schemes = doc
            .components
            .map(|components| components.security_schemes)
            .unwrap_or_default();
        assert!(schemes.contains_key("bearer"));
    }
}
