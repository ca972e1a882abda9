//! In-memory credential store.
//!
//! Records live for the lifetime of the process and are seeded at start-up.
//! Secrets are kept as Argon2id hashes; plaintext never reaches the map.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tracing::info;

use crate::auth::{normalize_username, AuthError, SecretHasher};
use crate::config::SeedUser;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    secret_hash: String,
}

impl User {
    pub(crate) fn secret_hash(&self) -> &str {
        &self.secret_hash
    }
}

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("user not found")]
    NotFound,
    #[error("stored secret changed concurrently")]
    Stale,
    #[error("username {0} is already taken")]
    DuplicateUsername(String),
    #[error("invalid seed user: {0}")]
    InvalidSeed(String),
    #[error(transparent)]
    Hashing(#[from] AuthError),
}

#[derive(Debug, Clone)]
pub struct CredentialStore {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    users: DashMap<i64, User>,
    ids_by_username: DashMap<String, i64>,
    next_id: AtomicI64,
    hasher: SecretHasher,
    /// Verified against when a username is unknown so both failure paths cost the same.
    decoy_hash: String,
}

impl CredentialStore {
    /// Build a store holding the given accounts, with ids assigned from 1 in order.
    pub async fn seeded(seed: &[SeedUser], hasher: SecretHasher) -> Result<Self, CredentialError> {
        let decoy_hash = hasher.hash(&nanoid::nanoid!(32)).await?;
        let store = Self {
            inner: Arc::new(Inner {
                users: DashMap::new(),
                ids_by_username: DashMap::new(),
                next_id: AtomicI64::new(1),
                hasher,
                decoy_hash,
            }),
        };

        for user in seed {
            if user.password.is_empty() {
                return Err(CredentialError::InvalidSeed(format!(
                    "{} has an empty password",
                    user.username
                )));
            }
            let id = store.insert(&user.username, &user.password).await?;
            info!(target: "auth", user_id = id, username = %user.username, "seeded account");
        }

        Ok(store)
    }

    async fn insert(&self, username: &str, secret: &str) -> Result<i64, CredentialError> {
        let username = normalize_username(username)
            .map_err(|_| CredentialError::InvalidSeed(format!("username {username:?}")))?;
        let secret_hash = self.inner.hasher.hash(secret).await?;

        let id = match self.inner.ids_by_username.entry(username.clone()) {
            Entry::Occupied(_) => return Err(CredentialError::DuplicateUsername(username)),
            Entry::Vacant(slot) => {
                let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                slot.insert(id);
                id
            }
        };

        self.inner.users.insert(
            id,
            User {
                id,
                username,
                secret_hash,
            },
        );
        Ok(id)
    }

    /// Look up a user by exact username and secret. Unknown usernames and wrong
    /// secrets are indistinguishable to the caller.
    pub async fn find_by_credentials(
        &self,
        username: &str,
        secret: &str,
    ) -> Result<Option<User>, CredentialError> {
        let candidate = self
            .inner
            .ids_by_username
            .get(username)
            .and_then(|id| self.find_by_id(*id));

        let Some(user) = candidate else {
            // Same work as a real mismatch.
            let _ = self.inner.hasher.verify(secret, &self.inner.decoy_hash).await;
            return Ok(None);
        };

        if self.verify_secret(&user, secret).await? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    pub fn find_by_id(&self, id: i64) -> Option<User> {
        self.inner.users.get(&id).map(|entry| entry.value().clone())
    }

    /// Check a secret claim against a user snapshot.
    pub async fn verify_secret(&self, user: &User, claim: &str) -> Result<bool, CredentialError> {
        Ok(self.inner.hasher.verify(claim, &user.secret_hash).await?)
    }

    /// Replace the secret of exactly one record.
    ///
    /// The write only happens while the record still holds `expected_hash`, the
    /// hash the caller verified against; otherwise [`CredentialError::Stale`].
    pub(crate) async fn update_secret(
        &self,
        id: i64,
        expected_hash: &str,
        new_secret: &str,
    ) -> Result<(), CredentialError> {
        let new_hash = self.inner.hasher.hash(new_secret).await?;

        let mut entry = self
            .inner
            .users
            .get_mut(&id)
            .ok_or(CredentialError::NotFound)?;
        if entry.secret_hash != expected_hash {
            return Err(CredentialError::Stale);
        }
        entry.secret_hash = new_hash;
        Ok(())
    }

    pub fn usernames(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .inner
            .ids_by_username
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppConfig;

    pub(crate) async fn default_store() -> CredentialStore {
        CredentialStore::seeded(&AppConfig::default().seed_users, SecretHasher::default())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn seed_assigns_stable_ids() {
        let store = default_store().await;
        assert_eq!(store.find_by_id(1).unwrap().username, "admin");
        assert_eq!(store.find_by_id(2).unwrap().username, "karyawan");
        assert!(store.find_by_id(3).is_none());
        assert_eq!(store.usernames(), vec!["admin", "karyawan"]);
    }

    #[tokio::test]
    async fn secrets_are_not_stored_in_plaintext() {
        let store = default_store().await;
        let admin = store.find_by_id(1).unwrap();
        assert_ne!(admin.secret_hash(), "admin123");
        assert!(admin.secret_hash().starts_with("$argon2id$"));
    }

    #[tokio::test]
    async fn credentials_must_match_exactly() {
        let store = default_store().await;
        let user = store
            .find_by_credentials("admin", "admin123")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.id, 1);

        assert!(store.find_by_credentials("admin", "user123").await.unwrap().is_none());
        assert!(store.find_by_credentials("nobody", "admin123").await.unwrap().is_none());
        assert!(store.find_by_credentials("karyawan", "").await.unwrap().is_none());
        assert!(store.find_by_credentials("ADMIN", "admin123").await.unwrap().is_none());
        assert!(store.find_by_credentials(" admin ", "admin123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_secret_requires_the_verified_hash() {
        let store = default_store().await;
        let admin = store.find_by_id(1).unwrap();

        store
            .update_secret(1, admin.secret_hash(), "fresh-secret")
            .await
            .unwrap();

        assert!(matches!(
            store.update_secret(1, admin.secret_hash(), "second").await,
            Err(CredentialError::Stale)
        ));
        assert!(store
            .find_by_credentials("admin", "fresh-secret")
            .await
            .unwrap()
            .is_some());
        assert!(matches!(
            store.update_secret(42, admin.secret_hash(), "x").await,
            Err(CredentialError::NotFound)
        ));
    }

    #[tokio::test]
    async fn duplicate_seed_usernames_are_rejected() {
        let seed = vec![
            SeedUser {
                username: "admin".to_string(),
                password: "one".to_string(),
            },
            SeedUser {
                username: "ADMIN".to_string(),
                password: "two".to_string(),
            },
        ];
        assert!(matches!(
            CredentialStore::seeded(&seed, SecretHasher::default()).await,
            Err(CredentialError::DuplicateUsername(name)) if name == "admin"
        ));
    }
}
