use subtle::ConstantTimeEq;
use tower_sessions::{session::Error as SessionError, Session};
use tracing::{error, warn};

use crate::sessions::SESSION_CSRF_KEY;

const CSRF_TOKEN_LENGTH: usize = 64;

/// Retrieve the CSRF token for the current session or generate a new one.
pub async fn ensure_csrf_token(session: &Session) -> Result<String, SessionError> {
    if let Some(token) = session.get::<String>(SESSION_CSRF_KEY).await? {
        return Ok(token);
    }

    let token = nanoid::nanoid!(CSRF_TOKEN_LENGTH);
    session.insert(SESSION_CSRF_KEY, &token).await?;
    Ok(token)
}

/// Replace the session's CSRF token, e.g. after privilege changes.
pub async fn rotate_csrf_token(session: &Session) -> Result<String, SessionError> {
    let _ = session.remove::<String>(SESSION_CSRF_KEY).await?;
    ensure_csrf_token(session).await
}

/// Compare a submitted token with the session's in constant time.
pub async fn validate_csrf_token(session: &Session, provided: &str) -> Result<bool, SessionError> {
    let Some(expected) = session.get::<String>(SESSION_CSRF_KEY).await? else {
        return Ok(false);
    };

    Ok(expected.as_bytes().ct_eq(provided.as_bytes()).unwrap_u8() == 1)
}

/// Validate a form token, rotating the session token when it does not match.
///
/// `context` names the form in log lines.
pub async fn check_form_token(
    session: &Session,
    provided: Option<&str>,
    context: &'static str,
) -> Result<bool, SessionError> {
    let valid = match provided {
        Some(token) => validate_csrf_token(session, token).await?,
        None => false,
    };

    if !valid {
        warn!(target: "csrf", form = context, "invalid or missing CSRF token");
        if let Err(err) = rotate_csrf_token(session).await {
            error!(target: "csrf", form = context, %err, "failed to rotate CSRF token after mismatch");
        }
    }

    Ok(valid)
}
