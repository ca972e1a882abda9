use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};
use tower_sessions::Session;
use tracing::{error, info, warn};

use crate::{
    app_state::AppState,
    csrf,
    sessions::SessionUser,
    templates::Flash,
    upload_store::UploadRecord,
    uploads::{
        human_readable_size, receive_upload, UploadCandidate, UploadError, UploadRejection,
    },
};

use crate::server::{
    constants::MULTIPART_OVERHEAD_BYTES,
    utils::{declared_content_length, sanitize_filename, server_error_response},
};

use super::shared::{render_dashboard, require_user};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const CSRF_FAILURE_MESSAGE: &str = "Your session expired. Please refresh the page and try again.";

/// POST /upload — validate and store a single multipart file field.
///
/// The `csrf_token` field has to precede the `file` field so the token is
/// checked before any bytes are written. A token arriving after the file
/// refuses the request and removes the stored file.
pub async fn upload_submit_handler(
    State(state): State<AppState>,
    session: Session,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let user = match require_user(&session).await {
        Ok(user) => user,
        Err(response) => return response,
    };

    let validator = state.upload_validator();
    if let Err(rejection) =
        validator.preflight(declared_content_length(&headers), MULTIPART_OVERHEAD_BYTES)
    {
        warn!(target: "upload", user_id = user.id, %rejection, "upload refused before reading body");
        return rejection_response(&state, &session, user, &rejection).await;
    }

    let mut csrf_verified = false;
    let mut stored: Option<UploadRecord> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                let rejection = multipart_rejection(&state, &err);
                warn!(target: "upload", %err, "malformed multipart payload");
                discard_stored(&state, stored.take()).await;
                return rejection_response(&state, &session, user, &rejection).await;
            }
        };

        let field_name = field.name().map(ToString::to_string);
        match field_name.as_deref() {
            Some("csrf_token") => {
                if stored.is_some() {
                    warn!(target: "upload", user_id = user.id, "CSRF field after the file field");
                    discard_stored(&state, stored.take()).await;
                    return csrf_failure_response(&state, &session, user).await;
                }

                let token = match field.text().await {
                    Ok(token) => token,
                    Err(err) => {
                        let rejection = multipart_rejection(&state, &err);
                        warn!(target: "upload", %err, "failed to read CSRF field");
                        discard_stored(&state, stored.take()).await;
                        return rejection_response(&state, &session, user, &rejection).await;
                    }
                };
                match csrf::check_form_token(&session, Some(token.as_str()), "upload").await {
                    Ok(valid) => csrf_verified = valid,
                    Err(err) => {
                        error!(target: "upload", %err, "failed to validate CSRF token");
                        discard_stored(&state, stored.take()).await;
                        return server_error_response();
                    }
                }
            }
            Some("file") => {
                if !csrf_verified {
                    warn!(target: "upload", user_id = user.id, "file field without a valid CSRF token");
                    discard_stored(&state, stored.take()).await;
                    return csrf_failure_response(&state, &session, user).await;
                }

                if stored.is_some() {
                    discard_stored(&state, stored.take()).await;
                    return rejection_response(&state, &session, user, &UploadRejection::MultipleFiles)
                        .await;
                }

                let original_name = match field.file_name() {
                    Some(name) if !name.trim().is_empty() => sanitize_filename(Some(name)),
                    _ => {
                        return rejection_response(&state, &session, user, &UploadRejection::EmptyUpload)
                            .await;
                    }
                };
                let declared_type = field
                    .content_type()
                    .unwrap_or(FALLBACK_CONTENT_TYPE)
                    .to_string();

                let candidate = UploadCandidate {
                    original_name,
                    declared_type,
                    declared_len: None,
                    body: Box::pin(field),
                };

                match receive_upload(validator, state.uploads(), candidate).await {
                    Ok(record) => stored = Some(record),
                    Err(err) => return upload_error_response(&state, &session, user, err).await,
                }
            }
            _ => {
                if let Err(err) = field.bytes().await {
                    let rejection = multipart_rejection(&state, &err);
                    warn!(target: "upload", %err, "failed to drain form field");
                    discard_stored(&state, stored.take()).await;
                    return rejection_response(&state, &session, user, &rejection).await;
                }
            }
        }
    }

    if !csrf_verified {
        discard_stored(&state, stored.take()).await;
        return csrf_failure_response(&state, &session, user).await;
    }

    let Some(record) = stored else {
        return rejection_response(&state, &session, user, &UploadRejection::EmptyUpload).await;
    };

    info!(
        target: "upload",
        user_id = user.id,
        stored_name = %record.stored_name,
        original_name = %record.original_name,
        size_bytes = record.size_bytes,
        checksum = %record.checksum_hex,
        "file uploaded"
    );

    if let Err(err) = csrf::rotate_csrf_token(&session).await {
        error!(target: "csrf", %err, "failed to rotate CSRF token after upload");
    }

    render_dashboard(
        &state,
        &session,
        user,
        Some(Flash::success(format!(
            "File uploaded! Stored as {}",
            record.stored_name
        ))),
        StatusCode::OK,
    )
    .await
}

async fn upload_error_response(
    state: &AppState,
    session: &Session,
    user: SessionUser,
    err: UploadError,
) -> Response {
    match err {
        UploadError::Rejected(rejection) => rejection_response(state, session, user, &rejection).await,
        UploadError::Stream(err) => {
            warn!(target: "upload", %err, "upload stream ended abnormally");
            rejection_response(state, session, user, &UploadRejection::Malformed).await
        }
        UploadError::Store(err) => {
            error!(target: "upload", %err, "failed to persist uploaded file");
            server_error_response()
        }
    }
}

async fn csrf_failure_response(state: &AppState, session: &Session, user: SessionUser) -> Response {
    render_dashboard(
        state,
        session,
        user,
        Some(Flash::error(CSRF_FAILURE_MESSAGE)),
        StatusCode::FORBIDDEN,
    )
    .await
}

async fn rejection_response(
    state: &AppState,
    session: &Session,
    user: SessionUser,
    rejection: &UploadRejection,
) -> Response {
    render_dashboard(
        state,
        session,
        user,
        Some(Flash::error(rejection.to_string())),
        rejection_status(rejection),
    )
    .await
}

fn rejection_status(rejection: &UploadRejection) -> StatusCode {
    match rejection {
        UploadRejection::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        UploadRejection::DisallowedExtension { .. } | UploadRejection::DisallowedType { .. } => {
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        }
        UploadRejection::EmptyUpload | UploadRejection::MultipleFiles => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        UploadRejection::Malformed => StatusCode::BAD_REQUEST,
    }
}

/// Body-limit failures surface as multipart errors; report them as size rejections.
fn multipart_rejection(state: &AppState, err: &MultipartError) -> UploadRejection {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        let limit = state.upload_validator().policy().max_upload_bytes();
        UploadRejection::TooLarge {
            limit,
            limit_display: human_readable_size(limit),
        }
    } else {
        UploadRejection::Malformed
    }
}

/// Remove a file accepted earlier in a request that is now being refused.
async fn discard_stored(state: &AppState, record: Option<UploadRecord>) {
    let Some(record) = record else {
        return;
    };
    if let Err(err) = state.uploads().remove(&record.stored_name).await {
        error!(target: "upload", stored_name = %record.stored_name, %err, "failed to remove discarded upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejections_map_to_distinct_statuses() {
        let too_large = UploadRejection::TooLarge {
            limit: 1,
            limit_display: "1 B".to_string(),
        };
        assert_eq!(rejection_status(&too_large), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(
            rejection_status(&UploadRejection::DisallowedExtension {
                allowed: String::new()
            }),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            rejection_status(&UploadRejection::DisallowedType {
                allowed: String::new()
            }),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(
            rejection_status(&UploadRejection::MultipleFiles),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            rejection_status(&UploadRejection::Malformed),
            StatusCode::BAD_REQUEST
        );
    }
}
