use axum::{extract::State, http::StatusCode, response::Response};
use tower_sessions::Session;

use crate::app_state::AppState;

use super::shared::{render_dashboard, require_user};

/// GET /dashboard — upload form, file list and password form.
pub async fn dashboard_handler(State(state): State<AppState>, session: Session) -> Response {
    let user = match require_user(&session).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    render_dashboard(&state, &session, user, None, StatusCode::OK).await
}
