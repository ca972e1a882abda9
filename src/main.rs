use std::net::SocketAddr;

use safe_portal::{
    app_state::AppState,
    auth::SecretHasher,
    build_router,
    config::{AppConfig, ConfigError},
    credentials::{CredentialError, CredentialStore},
    logging::init_logging,
    upload_store::UploadStore,
    RouterError,
};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Credential store error: {0}")]
    Credentials(#[from] CredentialError),
    #[error("Router error: {0}")]
    Router(#[from] RouterError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),
    #[error("Logging error: {0}")]
    Logging(String),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Initialize logging first
    init_logging().map_err(|e| AppError::Logging(e.to_string()))?;
    info!("Starting Safe Portal");

    let config = AppConfig::load()?;
    info!(
        storage_root = %config.storage.root.display(),
        max_upload_bytes = config.storage.max_upload_bytes,
        "Configuration loaded successfully"
    );

    let hasher = SecretHasher::new(config.security.password_pepper.clone());
    let credentials = CredentialStore::seeded(&config.seed_users, hasher).await?;
    info!(accounts = ?credentials.usernames(), "Credential store seeded");
    let uploads = UploadStore::open(config.storage.root.clone()).await?;

    let addr = SocketAddr::new(config.server.bind_addr.parse()?, config.server.port);

    let app_state = AppState::new(config, credentials, uploads);
    let app = build_router(app_state)?;

    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
