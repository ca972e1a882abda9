use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tower::ServiceBuilder;
use tower_http::services::ServeDir;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::cookie::{time::Duration as CookieDuration, Key, SameSite};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer};

use crate::app_state::AppState;
use crate::config::ConfigError;
use crate::server::constants::{MULTIPART_OVERHEAD_BYTES, UPLOADS_MOUNT};
use crate::server::handlers;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("session key error: {0}")]
    SessionKey(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Construct the application's HTTP router with all routes and middleware configured.
pub fn build_router(state: AppState) -> Result<Router, RouterError> {
    let config = state.config();

    let key_bytes = config.session_key_bytes()?;
    let key = Key::try_from(key_bytes.as_slice())
        .map_err(|err| RouterError::SessionKey(err.to_string()))?;
    let max_age_hours = i64::try_from(config.session.max_age_hours).unwrap_or(i64::MAX / 3600);

    // Sessions live in process memory and vanish on restart.
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_name(config.session.cookie_name.clone())
        .with_secure(config.security.cookie_secure)
        .with_http_only(true)
        .with_same_site(SameSite::Lax)
        .with_path("/")
        .with_expiry(Expiry::OnInactivity(CookieDuration::hours(max_age_hours)))
        .with_signed(key);

    let upload_body_limit = config
        .storage
        .max_upload_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);
    let upload_body_limit = usize::try_from(upload_body_limit).unwrap_or(usize::MAX);

    let upload_routes = Router::new()
        .route("/upload", post(handlers::uploads::upload_submit_handler))
        .layer(DefaultBodyLimit::max(upload_body_limit));

    let stored_files = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .service(ServeDir::new(state.uploads().root()));

    let router = Router::new()
        .route("/", get(handlers::auth::login_form_handler))
        .route("/login", post(handlers::auth::login_submit_handler))
        .route("/logout", post(handlers::auth::logout_handler))
        .route("/dashboard", get(handlers::dashboard::dashboard_handler))
        .route(
            "/change-password",
            post(handlers::account::change_password_handler),
        )
        .route("/healthz", get(handlers::health::health_handler))
        .merge(upload_routes)
        .nest_service(UPLOADS_MOUNT, stored_files)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(session_layer),
        )
        .with_state(state);

    Ok(router)
}
