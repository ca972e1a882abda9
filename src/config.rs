use base64::engine::general_purpose;
use base64::Engine;
use config::{Config, ConfigError as BaseConfigError, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

use crate::uploads::FileCategory;

/// Smallest upload ceiling accepted by configuration validation.
const MIN_MAX_UPLOAD_BYTES: u64 = 1024 * 1024;
/// Largest upload ceiling accepted by configuration validation.
const MAX_MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024 * 1024;
/// Signed cookies need a 64 byte master key.
const MIN_SESSION_SECRET_LEN: usize = 64;

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct StorageConfig {
    pub root: PathBuf,
    pub max_upload_bytes: u64,
    pub allowed_categories: Vec<FileCategory>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SecurityConfig {
    pub session_secret: String,
    pub cookie_secure: bool,
    pub password_pepper: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub max_age_hours: u64,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct UiConfig {
    pub brand_name: String,
}

/// Account created in the in-memory credential store at start-up.
#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct SeedUser {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, Serialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub security: SecurityConfig,
    pub session: SessionConfig,
    pub ui: UiConfig,
    pub seed_users: Vec<SeedUser>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Config(#[from] BaseConfigError),
    #[error("Storage directory error: {0}")]
    StorageDir(String),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let mut settings = Config::builder();

        settings = settings.add_source(Config::try_from(&AppConfig::default())?);
        settings = settings.add_source(File::with_name("config").required(false));

        // Environment overrides for the nested fields operators touch most
        if let Ok(value) = std::env::var("SERVER_BIND_ADDR") {
            settings = settings.set_override("server.bind_addr", value)?;
        }
        if let Ok(value) = std::env::var("SERVER_PORT") {
            settings = settings.set_override("server.port", parse_env::<u16>("SERVER_PORT", &value)?)?;
        }
        if let Ok(value) = std::env::var("STORAGE_ROOT") {
            settings = settings.set_override("storage.root", value)?;
        }
        if let Ok(value) = std::env::var("MAX_UPLOAD_BYTES") {
            settings = settings.set_override(
                "storage.max_upload_bytes",
                parse_env::<u64>("MAX_UPLOAD_BYTES", &value)?,
            )?;
        }
        if let Ok(value) = std::env::var("ALLOWED_CATEGORIES") {
            settings = settings.set_override(
                "storage.allowed_categories",
                value
                    .split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect::<Vec<String>>(),
            )?;
        }
        if let Ok(value) = std::env::var("SESSION_SECRET") {
            settings = settings.set_override("security.session_secret", value)?;
        }
        if let Ok(value) = std::env::var("COOKIE_SECURE") {
            settings = settings.set_override(
                "security.cookie_secure",
                parse_env::<bool>("COOKIE_SECURE", &value)?,
            )?;
        }
        settings = settings.set_override(
            "security.password_pepper",
            std::env::var("PASSWORD_PEPPER").ok(),
        )?;
        if let Ok(value) = std::env::var("SESSION_COOKIE_NAME") {
            settings = settings.set_override("session.cookie_name", value)?;
        }
        if let Ok(value) = std::env::var("SESSION_MAX_AGE_HOURS") {
            settings = settings.set_override(
                "session.max_age_hours",
                parse_env::<u64>("SESSION_MAX_AGE_HOURS", &value)?,
            )?;
        }
        if let Ok(value) = std::env::var("UI_BRAND_NAME") {
            settings = settings.set_override("ui.brand_name", value)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "Server port cannot be 0".to_string(),
            ));
        }

        if self.storage.max_upload_bytes < MIN_MAX_UPLOAD_BYTES {
            return Err(ConfigError::Validation(
                "MAX_UPLOAD_BYTES must be at least 1MB".to_string(),
            ));
        }
        if self.storage.max_upload_bytes > MAX_MAX_UPLOAD_BYTES {
            return Err(ConfigError::Validation(
                "MAX_UPLOAD_BYTES cannot exceed 5GB".to_string(),
            ));
        }

        self.storage.allowed_categories.sort();
        self.storage.allowed_categories.dedup();
        if self.storage.allowed_categories.is_empty() {
            return Err(ConfigError::Validation(
                "ALLOWED_CATEGORIES must name at least one category".to_string(),
            ));
        }

        if let Err(e) = fs::create_dir_all(&self.storage.root) {
            return Err(ConfigError::StorageDir(format!(
                "Cannot create storage directory {}: {}",
                self.storage.root.display(),
                e
            )));
        }

        if self.session_key_bytes()?.len() < MIN_SESSION_SECRET_LEN {
            return Err(ConfigError::Validation(format!(
                "SESSION_SECRET must be at least {MIN_SESSION_SECRET_LEN} bytes"
            )));
        }

        if self.session.max_age_hours == 0 {
            return Err(ConfigError::Validation(
                "SESSION_MAX_AGE_HOURS must be at least 1".to_string(),
            ));
        }

        if self.seed_users.is_empty() {
            return Err(ConfigError::Validation(
                "at least one seed user is required".to_string(),
            ));
        }

        Ok(())
    }

    /// Raw key material for signing session cookies. Accepts a `base64:` prefix.
    pub fn session_key_bytes(&self) -> Result<Vec<u8>, ConfigError> {
        let secret = &self.security.session_secret;
        match secret.strip_prefix("base64:") {
            Some(encoded) => general_purpose::STANDARD.decode(encoded).map_err(|e| {
                ConfigError::Validation(format!("Invalid base64 for SESSION_SECRET: {}", e))
            }),
            None => Ok(secret.as_bytes().to_vec()),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Validation(format!("{name} has an invalid value: {value}")))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                bind_addr: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                root: PathBuf::from("./data/uploads"),
                max_upload_bytes: 50 * 1024 * 1024, // 50MB
                allowed_categories: FileCategory::ALL.to_vec(),
            },
            security: SecurityConfig {
                session_secret: "".to_string(), // Must be provided by user
                cookie_secure: false,
                password_pepper: None,
            },
            session: SessionConfig {
                cookie_name: "portal_session".to_string(),
                max_age_hours: 24,
            },
            ui: UiConfig {
                brand_name: "Safe Portal".to_string(),
            },
            seed_users: vec![
                SeedUser {
                    username: "admin".to_string(),
                    password: "admin123".to_string(),
                },
                SeedUser {
                    username: "karyawan".to_string(),
                    password: "user123".to_string(),
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.storage.root = root.to_path_buf();
        config.security.session_secret = "s".repeat(64);
        config
    }

    #[test]
    fn default_config_requires_a_session_secret() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.storage.root = dir.path().join("uploads");

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(msg) if msg.contains("SESSION_SECRET")));
    }

    #[test]
    fn base64_session_secret_is_decoded_before_length_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.security.session_secret =
            format!("base64:{}", general_purpose::STANDARD.encode([7u8; 64]));

        config.validate().unwrap();
        assert_eq!(config.session_key_bytes().unwrap(), vec![7u8; 64]);
    }

    #[test]
    fn upload_ceiling_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.storage.max_upload_bytes = 512;
        assert!(config.validate().is_err());

        config.storage.max_upload_bytes = 6 * 1024 * 1024 * 1024;
        assert!(config.validate().is_err());
    }

    #[test]
    fn allowed_categories_are_deduplicated_and_required() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = valid_config(dir.path());
        config.storage.allowed_categories = vec![FileCategory::Pdf, FileCategory::Pdf];
        config.validate().unwrap();
        assert_eq!(config.storage.allowed_categories, vec![FileCategory::Pdf]);

        config.storage.allowed_categories.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn defaults_seed_two_accounts() {
        let config = AppConfig::default();
        let names: Vec<_> = config.seed_users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, ["admin", "karyawan"]);
        assert_eq!(config.storage.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn port_overrides_must_fit_a_u16() {
        assert_eq!(parse_env::<u16>("SERVER_PORT", " 8080 ").unwrap(), 8080);
        assert!(matches!(
            parse_env::<u16>("SERVER_PORT", "70000"),
            Err(ConfigError::Validation(message)) if message.contains("SERVER_PORT")
        ));
    }
}
