use axum::{
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use std::path::Path;

/// Produce a display-safe file name, falling back to a default when necessary.
///
/// Only used for logging and records; storage names are generated separately.
pub fn sanitize_filename(raw: Option<&str>) -> String {
    const FALLBACK: &str = "upload.bin";
    let Some(name) = raw else {
        return FALLBACK.to_string();
    };

    let trimmed = name.trim();
    if trimmed.is_empty() {
        return FALLBACK.to_string();
    }

    let last_segment = trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed);
    let candidate = Path::new(last_segment)
        .file_name()
        .and_then(|segment| segment.to_str())
        .unwrap_or(FALLBACK);

    let cleaned: String = candidate.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return FALLBACK.to_string();
    }

    cleaned.chars().take(255).collect()
}

/// Declared request length from the `Content-Length` header, if present and numeric.
pub fn declared_content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
}

/// Canonical application server error response body.
pub fn server_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "Unable to process your request. Please try again later.",
    )
        .into_response()
}

/// Convenience for attaching a `Retry-After` header to rate-limited responses.
pub fn attach_retry_after(response: &mut Response, seconds: u64) {
    if let Ok(value) = HeaderValue::from_str(&seconds.max(1).to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_filename_keeps_only_the_last_segment() {
        assert_eq!(sanitize_filename(Some("../../etc/passwd")), "passwd");
        assert_eq!(sanitize_filename(Some("C:\\Users\\me\\photo.jpg")), "photo.jpg");
        assert_eq!(sanitize_filename(Some("  ")), "upload.bin");
        assert_eq!(sanitize_filename(None), "upload.bin");
        assert_eq!(sanitize_filename(Some("a\u{0}b.png")), "ab.png");
    }

    #[test]
    fn content_length_parsing_ignores_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(declared_content_length(&headers), None);
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        assert_eq!(declared_content_length(&headers), Some(1024));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("lots"));
        assert_eq!(declared_content_length(&headers), None);
    }
}
