// Embedded single-page dashboard

use axum::{
    http::Uri,
    response::{Html, IntoResponse, Response},
};

use crate::error::ApiError;

const INDEX_HTML: &str = include_str!("../../static/index.html");

pub(super) async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Unknown `/api` and `/ws` paths get a JSON 404; everything else is the dashboard.
pub(super) async fn fallback(uri: Uri) -> Response {
    if is_api_path(uri.path()) {
        return ApiError::NotFound("Not found").into_response();
    }
    Html(INDEX_HTML).into_response()
}

fn is_api_path(path: &str) -> bool {
    ["/api", "/ws"]
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)))
}
