//! Session-bound identity.
//!
//! The user id stored here is written once, by the login handler after the
//! session id has been cycled, and cleared only by logout. Nothing else writes
//! [`SESSION_USER_KEY`], so a session can never be repointed at another user.

use serde::{Deserialize, Serialize};
use tower_sessions::{session::Error as SessionError, Session};

pub const SESSION_USER_KEY: &str = "auth.user";
pub const SESSION_CSRF_KEY: &str = "security.csrf";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub username: String,
}

impl SessionUser {
    pub fn new(id: i64, username: String) -> Self {
        Self { id, username }
    }
}

/// Bind an authenticated user to the session. Call only after `cycle_id`.
pub async fn store_user(session: &Session, user: &SessionUser) -> Result<(), SessionError> {
    session.insert(SESSION_USER_KEY, user).await
}

pub async fn clear_user(session: &Session) -> Result<(), SessionError> {
    let _ = session.remove::<SessionUser>(SESSION_USER_KEY).await?;
    Ok(())
}

pub async fn current_user(session: &Session) -> Result<Option<SessionUser>, SessionError> {
    session.get(SESSION_USER_KEY).await
}
