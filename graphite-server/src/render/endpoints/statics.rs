use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Responds with `status` and its reason phrase as body.
pub fn status_response(status: StatusCode) -> Response {
    (status, status.canonical_reason().unwrap_or_default()).into_response()
}

/// An endpoint function that always responds with `404 Not Found`.
pub async fn not_found() -> Response {
    status_response(StatusCode::NOT_FOUND)
}
