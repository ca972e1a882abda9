use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::{error, warn};

use crate::{
    account::{change_password, PasswordChangeError},
    app_state::AppState,
    csrf,
    templates::Flash,
};

use crate::server::utils::server_error_response;

use super::shared::{render_dashboard, require_user};

#[derive(Debug, Deserialize)]
pub(crate) struct ChangePasswordForm {
    #[serde(default)]
    csrf_token: String,
    #[serde(default)]
    current_password: String,
    #[serde(default)]
    new_password: String,
    /// Accepted so that crafted submissions still parse; never used to pick the account.
    #[serde(default)]
    user_id: Option<String>,
}

/// POST /change-password — always targets the session's own account.
pub async fn change_password_handler(
    State(state): State<AppState>,
    session: Session,
    Form(form): Form<ChangePasswordForm>,
) -> Response {
    let user = match require_user(&session).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    if let Some(requested) = form.user_id.as_deref() {
        warn!(
            target: "account",
            session_user_id = user.id,
            requested_user_id = requested,
            "ignoring user_id submitted with password change"
        );
    }

    match csrf::check_form_token(&session, Some(form.csrf_token.as_str()), "change-password").await {
        Ok(true) => {}
        Ok(false) => {
            return render_dashboard(
                &state,
                &session,
                user,
                Some(Flash::error(
                    "Your session expired. Please refresh the page and try again.",
                )),
                StatusCode::FORBIDDEN,
            )
            .await;
        }
        Err(err) => {
            error!(target: "account", %err, "failed to validate CSRF token");
            return server_error_response();
        }
    }

    let outcome = change_password(
        state.credentials(),
        Some(&user),
        &form.current_password,
        &form.new_password,
    )
    .await;

    match outcome {
        Ok(()) => {
            if let Err(err) = session.cycle_id().await {
                error!(target: "account", %err, "failed to cycle session after password change");
                return server_error_response();
            }
            if let Err(err) = csrf::rotate_csrf_token(&session).await {
                error!(target: "csrf", %err, "failed to rotate CSRF token after password change");
            }
            render_dashboard(
                &state,
                &session,
                user,
                Some(Flash::success("Password changed successfully.")),
                StatusCode::OK,
            )
            .await
        }
        Err(PasswordChangeError::Unauthenticated) => Redirect::to("/").into_response(),
        Err(err @ PasswordChangeError::WrongCurrentSecret) => {
            render_dashboard(
                &state,
                &session,
                user,
                Some(Flash::error(err.to_string())),
                StatusCode::FORBIDDEN,
            )
            .await
        }
        Err(err @ PasswordChangeError::EmptyNewSecret) => {
            render_dashboard(
                &state,
                &session,
                user,
                Some(Flash::error(err.to_string())),
                StatusCode::UNPROCESSABLE_ENTITY,
            )
            .await
        }
        Err(PasswordChangeError::Store(err)) => {
            error!(target: "account", %err, "password change failed");
            server_error_response()
        }
    }
}
