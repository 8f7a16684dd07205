//! Registration, login, logout and session lookup

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use parley_core::now_ms;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use super::{parse_body, AuthUser};
use crate::auth::{self, allowed_key, bearer_token, session_key, user_key, UserRecord};
use crate::error::{ServerError, ServerResult};
use crate::kv;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CredentialsBody {
    username: Option<String>,
    password: Option<String>,
}

impl CredentialsBody {
    fn into_parts(self) -> ServerResult<(String, String)> {
        let username = auth::normalize_username(self.username.as_deref().unwrap_or_default());
        let password = self.password.unwrap_or_default();
        if username.is_empty() || password.is_empty() {
            return Err(ServerError::bad_request("Missing fields"));
        }
        Ok((username, password))
    }
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub username: String,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ServerResult<Json<AuthResponse>> {
    let (username, password) = parse_body::<CredentialsBody>(&body)?.into_parts()?;
    if !auth::is_valid_username(&username) {
        return Err(ServerError::bad_request("Invalid username"));
    }
    let kv = state.kv.as_ref();

    let allowed =
        state.is_preallowed(&username) || kv.get(&allowed_key(&username)).await?.is_some();
    if !allowed {
        warn!("Registration refused for {}", username);
        return Err(ServerError::NotAllowed);
    }
    if kv.get(&user_key(&username)).await?.is_some() {
        return Err(ServerError::AlreadyRegistered);
    }

    let iterations = state.password_iterations;
    let record = {
        let username = username.clone();
        tokio::task::spawn_blocking(move || {
            UserRecord::create(&username, &password, iterations, now_ms())
        })
        .await
        .map_err(|e| ServerError::storage(format!("Password hashing failed: {}", e)))?
    };
    kv::put_json(kv, &user_key(&username), &record, None).await?;

    let token = auth::create_session(kv, &username, state.session_ttl(), now_ms()).await?;
    info!("Registered {}", username);
    Ok(Json(AuthResponse { token, username }))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ServerResult<Json<AuthResponse>> {
    let (username, password) = parse_body::<CredentialsBody>(&body)?.into_parts()?;
    if !auth::is_valid_username(&username) {
        return Err(ServerError::InvalidCredentials);
    }
    let kv = state.kv.as_ref();

    let record: UserRecord = kv::get_json(kv, &user_key(&username))
        .await?
        .ok_or(ServerError::InvalidCredentials)?;
    let verified = tokio::task::spawn_blocking(move || record.verify(&password))
        .await
        .map_err(|e| ServerError::storage(format!("Password check failed: {}", e)))?;
    if !verified {
        warn!("Failed login for {}", username);
        return Err(ServerError::InvalidCredentials);
    }

    let token = auth::create_session(kv, &username, state.session_ttl(), now_ms()).await?;
    info!("{} logged in", username);
    Ok(Json(AuthResponse { token, username }))
}

/// Drops the session if the token names one; always succeeds
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ServerResult<Json<Value>> {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if let Some(token) = bearer_token(header) {
        state.kv.delete(&session_key(token)).await?;
    }
    Ok(Json(json!({ "ok": true })))
}

pub async fn me(AuthUser(username): AuthUser) -> Json<Value> {
    Json(json!({ "username": username }))
}
