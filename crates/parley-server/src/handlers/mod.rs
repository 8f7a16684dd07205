pub mod admin;
pub mod auth;
pub mod conversations;
pub mod health;
pub mod proxy;

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use parley_core::now_ms;
use serde::de::DeserializeOwned;

use crate::auth::{bearer_token, resolve_session};
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Username behind the request's bearer token
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());
        let token = bearer_token(header).ok_or(ServerError::Unauthorized)?;
        let username = resolve_session(state.kv.as_ref(), token, now_ms()).await?;
        Ok(AuthUser(username))
    }
}

/// JSON request body, an empty body reading as `{}`
pub(crate) fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ServerResult<T> {
    let raw: &[u8] = if body.is_empty() { b"{}" } else { &body[..] };
    serde_json::from_slice(raw).map_err(|_| ServerError::InvalidJson)
}
