use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;

use crate::error::ServerError;

pub async fn health() -> impl IntoResponse {
    ([(CONTENT_TYPE, "text/plain")], "OK")
}

pub async fn not_found() -> ServerError {
    ServerError::NotFound
}
