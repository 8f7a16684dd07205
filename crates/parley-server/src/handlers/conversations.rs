//! Per-user conversation records, keyed `conv:<username>:<id>`
//!
//! Records are stored as the client sent them plus `username` and a
//! server-side `updatedAt`, unknown fields included.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::Json;
use parley_core::{now_ms, ConversationSummary};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{parse_body, AuthUser};
use crate::auth::KEY_SEPARATOR;
use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

pub fn conversation_key(username: &str, id: &str) -> String {
    format!("{}{}", conversation_prefix(username), id)
}

fn conversation_prefix(username: &str) -> String {
    format!("conv:{}{}", username, KEY_SEPARATOR)
}

/// Path ids are key segments and may not contain the separator
fn checked_id(id: String) -> ServerResult<String> {
    if id.is_empty() || id.chars().any(|c| c == KEY_SEPARATOR || c.is_control()) {
        return Err(ServerError::bad_request("Invalid conversation id"));
    }
    Ok(id)
}

fn owned_by(record: &Value, username: &str) -> bool {
    record.get("username").and_then(Value::as_str) == Some(username)
}

#[derive(Debug, Serialize)]
pub struct ConversationIndex {
    pub items: Vec<ConversationSummary>,
}

/// Index entry for a stored record; records without an id are skipped
fn summarize(record: &Value) -> Option<ConversationSummary> {
    let id = record.get("id")?.as_str().filter(|id| !id.is_empty())?;
    let updated_at = record
        .get("updatedAt")
        .and_then(Value::as_i64)
        .or_else(|| record.get("createdAt").and_then(Value::as_i64));
    Some(ConversationSummary {
        id: id.to_string(),
        title: record
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        updated_at,
    })
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
) -> ServerResult<Json<ConversationIndex>> {
    let keys = state.kv.list(&conversation_prefix(&username)).await?;
    let mut items = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(raw) = state.kv.get(&key).await? else {
            continue;
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(record) if owned_by(&record, &username) => items.extend(summarize(&record)),
            Ok(_) => warn!("Skipping {} owned by another user", key),
            Err(e) => warn!("Skipping unreadable record {}: {}", key, e),
        }
    }
    debug!("{} has {} stored conversations", username, items.len());
    Ok(Json(ConversationIndex { items }))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Response> {
    let id = checked_id(id)?;
    let raw = state
        .kv
        .get(&conversation_key(&username, &id))
        .await?
        .ok_or(ServerError::NotFound)?;
    Ok(([(CONTENT_TYPE, "application/json")], raw).into_response())
}

pub async fn put(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
    Path(id): Path<String>,
    body: Bytes,
) -> ServerResult<Json<Value>> {
    let id = checked_id(id)?;
    let mut record: Value = parse_body(&body)?;

    let Some(fields) = record.as_object_mut() else {
        return Err(ServerError::bad_request("Invalid payload"));
    };
    if fields.get("id").and_then(Value::as_str) != Some(id.as_str()) {
        return Err(ServerError::bad_request("Invalid payload"));
    }
    fields.insert("username".to_string(), json!(username));
    fields.insert("updatedAt".to_string(), json!(now_ms()));

    state
        .kv
        .put(
            &conversation_key(&username, &id),
            serde_json::to_string(&record)?,
            None,
        )
        .await?;
    debug!("Stored conversation {} for {}", id, username);
    Ok(Json(json!({ "ok": true })))
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(username): AuthUser,
    Path(id): Path<String>,
) -> ServerResult<Json<Value>> {
    let id = checked_id(id)?;
    state.kv.delete(&conversation_key(&username, &id)).await?;
    Ok(Json(json!({ "ok": true })))
}
