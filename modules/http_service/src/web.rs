use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};

/// Terminal responder for URLs neither a route nor a static file answered.
pub async fn not_found(uri: Uri) -> Response {
    (
        StatusCode::NOT_FOUND,
        format!("Can't find requested url:{}", uri.path()),
    )
        .into_response()
}
