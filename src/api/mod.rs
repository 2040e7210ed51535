use crate::auth::{
    gate::{optional_identity, require_identity},
    AuthState,
};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    middleware,
    routing::{get, post, put},
    Extension, Router,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;

pub mod handlers;
pub mod openapi;

pub use self::openapi::openapi;

/// Build the application router.
///
/// Routes under the gate get the caller's [`crate::auth::AuthContext`] as a
/// request extension. `/health` sits outside the tracing layers.
pub fn router(state: Arc<AuthState>, cors_origins: &[HeaderValue]) -> Router {
    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::list(cors_origins.iter().cloned()))
        .allow_credentials(true);

    let gated = Router::new()
        .route(
            "/auth/me",
            get(handlers::me::me).delete(handlers::me::delete_me),
        )
        .route("/auth/password", put(handlers::account::change_password))
        .route("/auth/deactivate", post(handlers::account::deactivate))
        .route("/auth/users/:id", get(handlers::users::user))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_identity,
        ));

    let optional = Router::new()
        .route("/auth/session", get(handlers::session::session))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            optional_identity,
        ));

    Router::new()
        .route("/auth/register", post(handlers::register::register))
        .route("/auth/login", post(handlers::login::login))
        .route("/auth/verify", post(handlers::verify::verify))
        .route("/api-docs/openapi.json", get(openapi::openapi_json))
        .merge(gated)
        .merge(optional)
        .fallback(handlers::not_found)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(state.clone())),
        )
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(Extension(state))
}

/// Start the server
///
/// The cache sweeper runs for as long as the server does and is cancelled on
/// graceful shutdown.
/// # Errors
/// Return error if failed to bind or serve
pub async fn new(
    port: u16,
    state: Arc<AuthState>,
    cors_origins: Vec<HeaderValue>,
    sweep_interval: Duration,
) -> Result<()> {
    let shutdown = CancellationToken::new();
    let sweeper = state
        .cache()
        .spawn_sweeper(sweep_interval, shutdown.child_token());

    let app = router(state, &cors_origins);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    let signal = shutdown.clone();
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Gracefully shutdown");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(err) = sweeper.await {
        tracing::warn!("cache sweeper ended abnormally: {err}");
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
