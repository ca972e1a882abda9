use crate::{
    config::AppConfig,
    credentials::CredentialStore,
    rate_limit::LoginRateLimiter,
    upload_store::UploadStore,
    uploads::{UploadPolicy, UploadValidator},
};
use std::sync::Arc;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<AppConfig>,
    /// Seeded in-memory accounts
    pub credentials: CredentialStore,
    /// Directory of accepted uploads
    pub uploads: UploadStore,
    /// Upload admission policy built from configuration
    pub upload_validator: Arc<UploadValidator>,
    /// Shared login rate limiter
    pub login_rate_limiter: Arc<LoginRateLimiter>,
}

impl AppState {
    pub fn new(config: AppConfig, credentials: CredentialStore, uploads: UploadStore) -> Self {
        let policy = UploadPolicy::new(
            config.storage.max_upload_bytes,
            config.storage.allowed_categories.clone(),
        );

        Self {
            config: Arc::new(config),
            credentials,
            uploads,
            upload_validator: Arc::new(UploadValidator::new(policy)),
            login_rate_limiter: Arc::new(LoginRateLimiter::new()),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn uploads(&self) -> &UploadStore {
        &self.uploads
    }

    pub fn upload_validator(&self) -> &UploadValidator {
        &self.upload_validator
    }

    pub fn login_rate_limiter(&self) -> &LoginRateLimiter {
        &self.login_rate_limiter
    }
}
