use axum::{
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use tower_sessions::Session;
use tracing::error;

use crate::{
    app_state::AppState,
    sessions::{current_user, SessionUser},
    templates::{DashboardTemplate, Flash, HtmlTemplate, LayoutContext},
    uploads::human_readable_size,
};

use crate::server::utils::server_error_response;

/// Build a [`LayoutContext`] from the current session, falling back to a state-only context when
/// the session lookup fails.
pub async fn layout_from_session(state: &AppState, session: &Session, title: &str) -> LayoutContext {
    match LayoutContext::from_session(state, session, title).await {
        Ok(layout) => layout,
        Err(err) => {
            error!(target: "templates", %err, "failed to build layout context from session");
            LayoutContext::from_state(state, title)
        }
    }
}

/// Resolve the signed-in user or send the visitor back to the login page.
pub async fn require_user(session: &Session) -> Result<SessionUser, Response> {
    match current_user(session).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => Err(Redirect::to("/").into_response()),
        Err(err) => {
            error!(target: "sessions", %err, "failed to read session user");
            Err(server_error_response())
        }
    }
}

/// Render the dashboard, optionally with a status line, using the given status code.
///
/// The file list always comes from the upload directory itself.
pub async fn render_dashboard(
    state: &AppState,
    session: &Session,
    user: SessionUser,
    flash: Option<Flash>,
    status: StatusCode,
) -> Response {
    let files = match state.uploads().list().await {
        Ok(files) => files,
        Err(err) => {
            error!(target: "upload", %err, "failed to list upload directory");
            return server_error_response();
        }
    };

    let policy = state.upload_validator().policy();
    let layout = layout_from_session(state, session, "Dashboard").await;
    let template = DashboardTemplate::new(layout, user)
        .with_files(files)
        .with_flash(flash)
        .with_upload_limits(
            human_readable_size(policy.max_upload_bytes()),
            policy.allowed_summary(),
        );

    HtmlTemplate::with_status(template, status).into_response()
}
