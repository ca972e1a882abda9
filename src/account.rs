//! Password changes for the signed-in account.
//!
//! The target account is always the session's own user id. There is no
//! parameter through which a request can name a different account, so the set
//! of records a caller can mutate is exactly `{session user}`.

use thiserror::Error;
use tracing::{error, info, warn};

use crate::credentials::{CredentialError, CredentialStore};
use crate::sessions::SessionUser;

#[derive(Debug, Error)]
pub enum PasswordChangeError {
    #[error("Sign in to change your password.")]
    Unauthenticated,
    #[error("The current password is incorrect.")]
    WrongCurrentSecret,
    #[error("The new password cannot be empty.")]
    EmptyNewSecret,
    #[error("credential store failure: {0}")]
    Store(#[source] CredentialError),
}

/// Replace the secret of the session's user after verifying the current one.
///
/// Verify-then-write is atomic: the new hash is swapped in only if the record
/// still holds the hash the claim was checked against.
pub async fn change_password(
    store: &CredentialStore,
    session_user: Option<&SessionUser>,
    current_claim: &str,
    new_secret: &str,
) -> Result<(), PasswordChangeError> {
    let Some(session_user) = session_user else {
        return Err(PasswordChangeError::Unauthenticated);
    };
    let user_id = session_user.id;

    if new_secret.is_empty() {
        return Err(PasswordChangeError::EmptyNewSecret);
    }

    let Some(record) = store.find_by_id(user_id) else {
        warn!(target: "account", user_id, "session refers to a missing account");
        return Err(PasswordChangeError::WrongCurrentSecret);
    };

    let verified = store
        .verify_secret(&record, current_claim)
        .await
        .map_err(PasswordChangeError::Store)?;
    if !verified {
        warn!(target: "account", user_id, "password change with wrong current password");
        return Err(PasswordChangeError::WrongCurrentSecret);
    }

    match store
        .update_secret(user_id, record.secret_hash(), new_secret)
        .await
    {
        Ok(()) => {
            info!(target: "account", user_id, username = %record.username, "password changed");
            Ok(())
        }
        Err(CredentialError::Stale) => {
            warn!(target: "account", user_id, "password changed concurrently; rejecting stale claim");
            Err(PasswordChangeError::WrongCurrentSecret)
        }
        Err(CredentialError::NotFound) => Err(PasswordChangeError::WrongCurrentSecret),
        Err(err) => {
            error!(target: "account", user_id, %err, "failed to store new password");
            Err(PasswordChangeError::Store(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::tests::default_store;

    fn session_for(store: &CredentialStore, id: i64) -> SessionUser {
        let user = store.find_by_id(id).unwrap();
        SessionUser::new(user.id, user.username)
    }

    async fn can_login(store: &CredentialStore, username: &str, secret: &str) -> bool {
        store
            .find_by_credentials(username, secret)
            .await
            .unwrap()
            .is_some()
    }

    #[tokio::test]
    async fn admin_changes_own_password() {
        let store = default_store().await;
        let admin = session_for(&store, 1);

        change_password(&store, Some(&admin), "admin123", "x")
            .await
            .unwrap();

        assert!(can_login(&store, "admin", "x").await);
        assert!(!can_login(&store, "admin", "admin123").await);
        assert!(can_login(&store, "karyawan", "user123").await);
    }

    #[tokio::test]
    async fn wrong_current_password_leaves_secret_unchanged() {
        let store = default_store().await;
        let admin = session_for(&store, 1);
        let before = store.find_by_id(1).unwrap();

        let err = change_password(&store, Some(&admin), "guess", "owned")
            .await
            .unwrap_err();

        assert!(matches!(err, PasswordChangeError::WrongCurrentSecret));
        assert_eq!(store.find_by_id(1).unwrap(), before);
        assert!(can_login(&store, "admin", "admin123").await);
    }

    #[tokio::test]
    async fn missing_session_is_unauthenticated() {
        let store = default_store().await;
        let err = change_password(&store, None, "admin123", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordChangeError::Unauthenticated));
        assert!(can_login(&store, "admin", "admin123").await);
    }

    #[tokio::test]
    async fn session_of_user_two_can_only_touch_user_two() {
        let store = default_store().await;
        let employee = session_for(&store, 2);
        let admin_before = store.find_by_id(1).unwrap();

        // Even knowing the admin's password does not redirect the write.
        let err = change_password(&store, Some(&employee), "admin123", "pwned")
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordChangeError::WrongCurrentSecret));

        change_password(&store, Some(&employee), "user123", "pwned")
            .await
            .unwrap();

        assert_eq!(store.find_by_id(1).unwrap(), admin_before);
        assert!(can_login(&store, "admin", "admin123").await);
        assert!(can_login(&store, "karyawan", "pwned").await);
    }

    #[tokio::test]
    async fn session_pointing_at_unknown_account_fails_closed() {
        let store = default_store().await;
        let ghost = SessionUser::new(99, "ghost".to_string());
        let err = change_password(&store, Some(&ghost), "anything", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordChangeError::WrongCurrentSecret));
    }

    #[tokio::test]
    async fn empty_new_password_is_refused() {
        let store = default_store().await;
        let admin = session_for(&store, 1);
        let err = change_password(&store, Some(&admin), "admin123", "")
            .await
            .unwrap_err();
        assert!(matches!(err, PasswordChangeError::EmptyNewSecret));
        assert!(can_login(&store, "admin", "admin123").await);
    }

    #[tokio::test]
    async fn concurrent_changes_with_same_claim_apply_once() {
        let store = default_store().await;
        let admin = session_for(&store, 1);

        let (first, second) = tokio::join!(
            change_password(&store, Some(&admin), "admin123", "first"),
            change_password(&store, Some(&admin), "admin123", "second"),
        );

        let successes = [first.is_ok(), second.is_ok()]
            .into_iter()
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
        assert!(!can_login(&store, "admin", "admin123").await);
        let first_won = can_login(&store, "admin", "first").await;
        let second_won = can_login(&store, "admin", "second").await;
        assert!(first_won ^ second_won);
    }

    #[tokio::test]
    async fn writes_targeted_by_request_data_are_what_session_scoping_prevents() {
        // Unscoped variant: the target id comes from the request body.
        let store = default_store().await;
        let body_user_id = 1;
        let victim = store.find_by_id(body_user_id).unwrap();
        store
            .update_secret(body_user_id, victim.secret_hash(), "taken-over")
            .await
            .unwrap();
        assert!(can_login(&store, "admin", "taken-over").await);

        // Scoped variant with the same attacker session never reaches user 1.
        let store = default_store().await;
        let attacker = session_for(&store, 2);
        let _ = change_password(&store, Some(&attacker), "anything", "taken-over").await;
        assert!(can_login(&store, "admin", "admin123").await);
    }
}
