use axum::{extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use crate::app_state::AppState;

/// GET /healthz — reports whether the upload directory is readable.
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.uploads().list().await {
        Ok(_) => (StatusCode::OK, "ok"),
        Err(err) => {
            error!(target: "upload", %err, "health check could not read upload directory");
            (StatusCode::SERVICE_UNAVAILABLE, "storage unavailable")
        }
    }
}
