use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    auth::{normalize_username, randomized_backoff},
    csrf,
    rate_limit::RateLimitError,
    sessions::{clear_user, current_user, store_user, SessionUser},
    templates::{HtmlTemplate, LayoutContext, LoginTemplate},
};

use crate::server::utils::{attach_retry_after, server_error_response};

use super::shared::layout_from_session;

const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password.";

#[derive(Debug, Deserialize)]
pub(crate) struct LoginForm {
    #[serde(default)]
    csrf_token: String,
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LogoutForm {
    #[serde(default)]
    csrf_token: String,
}

/// GET / — the login page, or the dashboard for signed-in visitors.
pub async fn login_form_handler(State(state): State<AppState>, session: Session) -> Response {
    match current_user(&session).await {
        Ok(Some(_)) => Redirect::to("/dashboard").into_response(),
        Ok(None) => {
            let layout = layout_from_session(&state, &session, "Sign in").await;
            HtmlTemplate::new(LoginTemplate::new(layout)).into_response()
        }
        Err(err) => {
            error!(target: "auth", %err, "failed to read user from session");
            let layout = LayoutContext::from_state(&state, "Sign in");
            HtmlTemplate::new(LoginTemplate::new(layout)).into_response()
        }
    }
}

/// POST /login
pub async fn login_submit_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    session: Session,
    Form(form): Form<LoginForm>,
) -> Response {
    let client_ip = addr.ip();

    if let Err(err) = state.login_rate_limiter().check_ip(client_ip) {
        warn!(target: "auth", ip = %client_ip, %err, "rate limited login by IP");
        return rate_limited_login_response(&state, &session, &form.username, &err).await;
    }

    let normalized_username = match normalize_username(&form.username) {
        Ok(username) => username,
        Err(_) => {
            randomized_backoff().await;
            return invalid_credentials_response(&state, &session, &form.username).await;
        }
    };

    if let Err(err) = state
        .login_rate_limiter()
        .check_username(&normalized_username)
    {
        warn!(target: "auth", username = %normalized_username, %err, "rate limited login by username");
        return rate_limited_login_response(&state, &session, &form.username, &err).await;
    }

    match csrf::check_form_token(&session, Some(form.csrf_token.as_str()), "login").await {
        Ok(true) => {}
        Ok(false) => {
            randomized_backoff().await;
            return render_login_page(
                &state,
                &session,
                &form.username,
                Some("Your session expired. Please try again.".to_string()),
                StatusCode::UNPROCESSABLE_ENTITY,
            )
            .await;
        }
        Err(err) => {
            error!(target: "auth", %err, "failed to validate CSRF token");
            return server_error_response();
        }
    }

    // Normalisation only keys the limiter; the lookup matches the username exactly.
    let user = match state
        .credentials()
        .find_by_credentials(&form.username, &form.password)
        .await
    {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!(target: "auth", username = %normalized_username, ip = %client_ip, "failed login");
            randomized_backoff().await;
            return invalid_credentials_response(&state, &session, &form.username).await;
        }
        Err(err) => {
            error!(target: "auth", %err, "error verifying credentials");
            return server_error_response();
        }
    };

    if let Err(err) = session.cycle_id().await {
        error!(target: "auth", %err, "failed to cycle session ID on login");
        return server_error_response();
    }

    let session_user = SessionUser::new(user.id, user.username.clone());
    if let Err(err) = store_user(&session, &session_user).await {
        error!(target: "auth", %err, "failed to persist authenticated user in session");
        return server_error_response();
    }

    if let Err(err) = csrf::rotate_csrf_token(&session).await {
        error!(target: "auth", %err, "failed to rotate CSRF token after login");
    }

    info!(target: "auth", user_id = user.id, username = %user.username, "signed in");
    Redirect::to("/dashboard").into_response()
}

/// POST /logout
pub async fn logout_handler(session: Session, Form(form): Form<LogoutForm>) -> Response {
    match csrf::check_form_token(&session, Some(form.csrf_token.as_str()), "logout").await {
        Ok(true) => {}
        Ok(false) => return (StatusCode::FORBIDDEN, "Invalid CSRF token").into_response(),
        Err(err) => {
            error!(target: "auth", %err, "failed to validate CSRF token on logout");
            return server_error_response();
        }
    }

    if let Err(err) = clear_user(&session).await {
        error!(target: "auth", %err, "failed to clear user session on logout");
        return server_error_response();
    }

    if let Err(err) = csrf::rotate_csrf_token(&session).await {
        error!(target: "auth", %err, "failed to rotate CSRF token during logout");
    }

    if let Err(err) = session.cycle_id().await {
        error!(target: "auth", %err, "failed to cycle session after logout");
        return server_error_response();
    }

    Redirect::to("/").into_response()
}

async fn invalid_credentials_response(
    state: &AppState,
    session: &Session,
    username: &str,
) -> Response {
    render_login_page(
        state,
        session,
        username,
        Some(INVALID_CREDENTIALS_MESSAGE.to_string()),
        StatusCode::UNAUTHORIZED,
    )
    .await
}

async fn render_login_page(
    state: &AppState,
    session: &Session,
    username: &str,
    error_message: Option<String>,
    status: StatusCode,
) -> Response {
    let mut template = LoginTemplate::new(layout_from_session(state, session, "Sign in").await)
        .with_username(username);
    if let Some(message) = error_message {
        template = template.with_error_message(message);
    }

    HtmlTemplate::with_status(template, status).into_response()
}

async fn rate_limited_login_response(
    state: &AppState,
    session: &Session,
    username: &str,
    error: &RateLimitError,
) -> Response {
    let message = match error {
        RateLimitError::Ip(_) => {
            "Too many login attempts from this IP address. Please wait and try again."
        }
        RateLimitError::Username(_) => {
            "Too many login attempts for this username. Please wait before trying again."
        }
    };

    let mut response = render_login_page(
        state,
        session,
        username,
        Some(message.to_string()),
        StatusCode::TOO_MANY_REQUESTS,
    )
    .await;

    attach_retry_after(&mut response, error.retry_after().as_secs());

    response
}
