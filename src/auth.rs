//! Secret hashing and login helpers.
//!
//! Secrets are stored as Argon2id PHC strings. An optional pepper is fed to
//! Argon2 as its keyed secret, so a leaked hash cannot be attacked without it.

use std::sync::Arc;
use std::time::Duration;

use argon2::{
    password_hash::{
        rand_core::OsRng, Error as PasswordHashError, PasswordHash, PasswordHasher,
        PasswordVerifier, SaltString,
    },
    Algorithm, Argon2, Params, Version,
};
use thiserror::Error;
use tokio::task;

const USERNAME_MIN_LEN: usize = 3;
const USERNAME_MAX_LEN: usize = 64;

/// Memory cost in KiB (19 MiB), the OWASP baseline for Argon2id.
const ARGON2_MEMORY_COST: u32 = 19_456;
const ARGON2_TIME_COST: u32 = 2;
const ARGON2_PARALLELISM: u32 = 1;
const ARGON2_OUTPUT_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid username")]
    InvalidUsername,
    #[error("Password hashing join error: {0}")]
    Join(#[from] task::JoinError),
    #[error("Password hashing error: {0:?}")]
    PasswordHash(PasswordHashError),
    #[error("Argon2 error: {0:?}")]
    Argon2(argon2::Error),
}

/// Hashes and verifies secrets off the async runtime.
#[derive(Clone, Default)]
pub struct SecretHasher {
    pepper: Option<Arc<[u8]>>,
}

impl std::fmt::Debug for SecretHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretHasher")
            .field("peppered", &self.pepper.is_some())
            .finish()
    }
}

impl SecretHasher {
    pub fn new(pepper: Option<String>) -> Self {
        Self {
            pepper: pepper
                .filter(|pepper| !pepper.is_empty())
                .map(|pepper| Arc::from(pepper.into_bytes())),
        }
    }

    /// Produce a salted PHC string for `secret`.
    pub async fn hash(&self, secret: &str) -> Result<String, AuthError> {
        let secret = secret.to_owned();
        let pepper = self.pepper.clone();

        task::spawn_blocking(move || {
            let argon2 = argon2_instance(pepper.as_deref())?;
            let salt = SaltString::generate(&mut OsRng);
            argon2
                .hash_password(secret.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(AuthError::PasswordHash)
        })
        .await?
    }

    /// Check `secret` against a stored PHC string.
    ///
    /// `Ok(false)` is a mismatch; errors mean the stored hash is unusable.
    pub async fn verify(&self, secret: &str, stored_hash: &str) -> Result<bool, AuthError> {
        let secret = secret.to_owned();
        let stored_hash = stored_hash.to_owned();
        let pepper = self.pepper.clone();

        task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&stored_hash).map_err(AuthError::PasswordHash)?;
            let argon2 = argon2_instance(pepper.as_deref())?;
            match argon2.verify_password(secret.as_bytes(), &parsed) {
                Ok(()) => Ok(true),
                Err(PasswordHashError::Password) => Ok(false),
                Err(err) => Err(AuthError::PasswordHash(err)),
            }
        })
        .await?
    }
}

fn argon2_instance(pepper: Option<&[u8]>) -> Result<Argon2<'_>, AuthError> {
    let params = Params::new(
        ARGON2_MEMORY_COST,
        ARGON2_TIME_COST,
        ARGON2_PARALLELISM,
        Some(ARGON2_OUTPUT_LENGTH),
    )
    .map_err(AuthError::Argon2)?;

    match pepper {
        Some(pepper) => Argon2::new_with_secret(pepper, Algorithm::Argon2id, Version::V0x13, params)
            .map_err(AuthError::Argon2),
        None => Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params)),
    }
}

/// Trim and lowercase a username, rejecting ones that cannot exist.
pub fn normalize_username(input: &str) -> Result<String, AuthError> {
    let trimmed = input.trim();
    let length_ok = (USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&trimmed.len());
    if !length_ok || trimmed.chars().any(char::is_whitespace) {
        return Err(AuthError::InvalidUsername);
    }

    Ok(trimmed.to_lowercase())
}

/// Sleep 150-300ms after a failed login.
pub async fn randomized_backoff() {
    let delay = Duration::from_millis(150 + fastrand::u64(0..150));
    tokio::time::sleep(delay).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_verifies_only_the_original_secret() {
        let hasher = SecretHasher::default();
        let hash = hasher.hash("admin123").await.unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!hash.contains("admin123"));

        assert!(hasher.verify("admin123", &hash).await.unwrap());
        assert!(!hasher.verify("admin124", &hash).await.unwrap());
    }

    #[tokio::test]
    async fn pepper_is_required_to_verify() {
        let peppered = SecretHasher::new(Some("pepper".to_string()));
        let hash = peppered.hash("user123").await.unwrap();

        assert!(peppered.verify("user123", &hash).await.unwrap());
        assert!(!SecretHasher::default().verify("user123", &hash).await.unwrap());
        assert!(!SecretHasher::new(Some("other".to_string()))
            .verify("user123", &hash)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn garbage_hash_is_an_error_not_a_mismatch() {
        assert!(matches!(
            SecretHasher::default().verify("anything", "not-a-phc-string").await,
            Err(AuthError::PasswordHash(_))
        ));
    }

    #[test]
    fn empty_pepper_means_no_pepper() {
        assert!(SecretHasher::new(Some(String::new())).pepper.is_none());
    }

    #[test]
    fn usernames_are_trimmed_and_lowercased() {
        assert_eq!(normalize_username("  Admin ").unwrap(), "admin");
        assert!(normalize_username("ab").is_err());
        assert!(normalize_username("two words").is_err());
        assert!(normalize_username(&"a".repeat(65)).is_err());
    }
}
