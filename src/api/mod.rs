use crate::{
    cache::Cache,
    keyring::KeyRing,
    otp::OtpStore,
    revocation::RevocationStore,
    sweeper,
};
use anyhow::{Context, Result};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    routing::get,
};
use sqlx::postgres::PgPoolOptions;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;
use utoipa_swagger_ui::SwaggerUi;

pub mod email;
pub mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

use handlers::auth::{AuthConfig, AuthState};
use handlers::root;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Everything `new` needs besides the auth configuration.
#[derive(Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub dsn: String,
    pub cache_url: String,
    pub keyring_path: PathBuf,
    pub rotation_days: i64,
    pub grace_days: i64,
    pub sweep_interval_seconds: u64,
}

/// Start the server.
///
/// # Errors
/// Returns an error if the database, cache, or keyring cannot be opened, or
/// the listener fails to bind.
pub async fn new(server: ServerConfig, auth_config: AuthConfig) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&server.dsn)
        .await
        .context("Failed to connect to database")?;

    let cache = Cache::from_url(&server.cache_url)
        .await
        .context("Failed to open cache backend")?;

    let keyring = KeyRing::open(&server.keyring_path, server.rotation_days, server.grace_days)
        .await
        .context("Failed to open signing keyring")?;

    let auth_state = Arc::new(AuthState::new(
        auth_config,
        keyring.clone(),
        RevocationStore::new(cache.clone()),
        OtpStore::new(cache),
        Arc::new(email::LogEmailSender),
    ));

    // Rotation check at startup, expired-session reaper on a timer.
    let shutdown = CancellationToken::new();
    let sweeper_handle = sweeper::spawn(
        pool.clone(),
        keyring,
        Duration::from_secs(server.sweep_interval_seconds),
        shutdown.clone(),
    );

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(Any);

    // Build the router from OpenAPI-wired routes, then extend it with
    // non-doc routes like `/` and the Swagger UI.
    let (router, api_spec) = router().split_for_parts();
    let app = router
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", api_spec))
        .route("/", get(root::root))
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
                .layer(Extension(auth_state.clone()))
                .layer(Extension(pool.clone())),
        );

    let listener = TcpListener::bind(format!("::0:{}", server.port)).await?;

    info!("Listening on [::]:{}", server.port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    // Stop the sweeper and wait out its in-flight iteration.
    shutdown.cancel();
    let _ = sweeper_handle.await;

    Ok(())
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
