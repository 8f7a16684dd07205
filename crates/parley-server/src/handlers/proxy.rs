//! Completion forwarding under a site-wide daily token quota

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};
use crate::state::AppState;

/// Counters expire two days after their last update
const QUOTA_TTL: Duration = Duration::from_secs(2 * 24 * 3600);

/// Counter key for the current UTC day, `quota:YYYY-MM-DD`
pub fn quota_key() -> String {
    format!("quota:{}", Utc::now().format("%Y-%m-%d"))
}

/// `usage.total_tokens` of an upstream reply, zero when absent
fn total_tokens(body: &str) -> Option<u64> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    Some(
        value
            .pointer("/usage/total_tokens")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0),
    )
}

pub async fn forward(State(state): State<Arc<AppState>>, body: Bytes) -> ServerResult<Response> {
    let key = quota_key();
    let used = state
        .kv
        .get(&key)
        .await?
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);
    if used >= state.config.daily_token_limit {
        info!("Daily quota reached ({} tokens)", used);
        return Err(ServerError::QuotaExhausted);
    }

    let api_key = state
        .api_key
        .as_deref()
        .ok_or_else(|| ServerError::NotConfigured("Upstream API key not configured".to_string()))?;

    let upstream = state
        .http
        .post(&state.config.upstream_url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", api_key))
        .body(body)
        .send()
        .await
        .map_err(|e| ServerError::Upstream(e.to_string()))?;
    let status = upstream.status().as_u16();
    let text = upstream
        .text()
        .await
        .map_err(|e| ServerError::Upstream(e.to_string()))?;

    match total_tokens(&text) {
        Some(tokens) if tokens > 0 => {
            match state.kv.incr(&key, tokens, Some(QUOTA_TTL)).await {
                Ok(total) => debug!("Quota {}: +{} = {}", key, tokens, total),
                Err(e) => warn!("Failed to record usage: {}", e),
            }
        }
        Some(_) => {}
        None => debug!("Upstream reply is not JSON, usage not recorded"),
    }

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    Ok((status, [(CONTENT_TYPE, "application/json")], text).into_response())
}
