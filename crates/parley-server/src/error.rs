use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced by the edge proxy. Every variant maps to an HTTP status
/// and an `{error}` JSON body.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not allowed")]
    NotAllowed,

    #[error("Already registered")]
    AlreadyRegistered,

    #[error("Not found")]
    NotFound,

    #[error("Site quota exhausted for today")]
    QuotaExhausted,

    #[error("Upstream request failed: {0}")]
    Upstream(String),

    #[error("{0}")]
    NotConfigured(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type ServerResult<T> = std::result::Result<T, ServerError>;

impl ServerError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::InvalidJson | ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::Unauthorized | ServerError::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            }
            ServerError::NotAllowed => StatusCode::FORBIDDEN,
            ServerError::AlreadyRegistered => StatusCode::CONFLICT,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::QuotaExhausted => StatusCode::TOO_MANY_REQUESTS,
            ServerError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ServerError::NotConfigured(_) => StatusCode::NOT_IMPLEMENTED,
            ServerError::Storage(_) | ServerError::Io(_) | ServerError::Serialization(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ServerError::Upstream(details) => json!({
                "error": "Upstream request failed",
                "details": details,
            }),
            other => json!({ "error": other.to_string() }),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), "{}", self);
        }
        (status, Json(body)).into_response()
    }
}
