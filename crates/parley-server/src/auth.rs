//! Password hashing, session tokens and the KV records behind them

use std::time::Duration;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{ServerError, ServerResult};
use crate::kv::{self, KvStore};

pub const PBKDF2_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;
const TOKEN_LEN: usize = 32;

pub fn user_key(username: &str) -> String {
    format!("user:{}", username)
}

pub fn allowed_key(username: &str) -> String {
    format!("allowed:{}", username)
}

pub fn session_key(token: &str) -> String {
    format!("session:{}", token)
}

/// Trimmed and lower-cased
pub fn normalize_username(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Separator between KV key segments
pub const KEY_SEPARATOR: char = ':';

/// Usernames are key segments: no separator, `/`, whitespace or control
/// characters
pub fn is_valid_username(username: &str) -> bool {
    !username.is_empty()
        && !username
            .chars()
            .any(|c| c == KEY_SEPARATOR || c == '/' || c.is_whitespace() || c.is_control())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    #[serde(rename = "saltB64")]
    pub salt_b64: String,
    #[serde(rename = "hashB64")]
    pub hash_b64: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    pub created_at: i64,
}

fn default_iterations() -> u32 {
    PBKDF2_ITERATIONS
}

impl UserRecord {
    /// Hash `password` with a fresh random salt
    pub fn create(username: &str, password: &str, iterations: u32, now_ms: i64) -> Self {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        Self {
            username: username.to_string(),
            salt_b64: B64.encode(salt),
            hash_b64: B64.encode(derive(password, &salt, iterations)),
            iterations,
            created_at: now_ms,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        let Ok(salt) = B64.decode(&self.salt_b64) else {
            return false;
        };
        let Ok(expected) = B64.decode(&self.hash_b64) else {
            return false;
        };
        let actual = derive(password, &salt, self.iterations);
        expected.len() == actual.len()
            && expected
                .iter()
                .zip(actual.iter())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LEN] {
    let mut out = [0u8; HASH_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out);
    out
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub username: String,
    /// Expiry in epoch milliseconds
    pub exp: i64,
}

/// 32 random bytes, hex encoded
pub fn new_token() -> String {
    let mut bytes = [0u8; TOKEN_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Token from an `Authorization: Bearer <token>` header, scheme matched
/// case-insensitively
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?;
    let (scheme, rest) = header.split_once(char::is_whitespace)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = rest.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// Store a new session for `username` and return its token
pub async fn create_session(
    kv: &dyn KvStore,
    username: &str,
    ttl: Duration,
    now_ms: i64,
) -> ServerResult<String> {
    let token = new_token();
    let record = SessionRecord {
        username: username.to_string(),
        exp: kv::expires_at(now_ms, ttl),
    };
    kv::put_json(kv, &session_key(&token), &record, Some(ttl)).await?;
    Ok(token)
}

/// Username owning a live session token
pub async fn resolve_session(kv: &dyn KvStore, token: &str, now_ms: i64) -> ServerResult<String> {
    let record: Option<SessionRecord> = kv::get_json(kv, &session_key(token)).await?;
    match record {
        Some(r) if r.exp > now_ms && !r.username.is_empty() => Ok(r.username),
        _ => Err(ServerError::Unauthorized),
    }
}
