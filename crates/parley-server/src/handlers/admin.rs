use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::parse_body;
use crate::auth::{allowed_key, is_valid_username, normalize_username};
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

pub const ADMIN_CODE_HEADER: &str = "x-admin-code";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AllowUserBody {
    username: Option<String>,
}

/// Grant registration to a username. Disabled unless an admin code is
/// configured.
pub async fn allow_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ServerResult<Json<Value>> {
    let provided = headers
        .get(ADMIN_CODE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    match state.config.admin_code.as_deref() {
        Some(code) if !code.is_empty() && code == provided => {}
        _ => return Err(ServerError::Unauthorized),
    }

    let body: AllowUserBody = parse_body(&body)?;
    let username = normalize_username(body.username.as_deref().unwrap_or_default());
    if username.is_empty() {
        return Err(ServerError::bad_request("Missing username"));
    }
    if !is_valid_username(&username) {
        return Err(ServerError::bad_request("Invalid username"));
    }

    state
        .kv
        .put(&allowed_key(&username), "1".to_string(), None)
        .await?;
    info!("Allowed {} to register", username);
    Ok(Json(json!({ "ok": true })))
}
