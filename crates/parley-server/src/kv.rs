//! Key-value persistence for users, sessions, conversations and quota
//! counters
//!
//! `MemoryKv` keeps everything in a map with per-entry expiry and, when
//! given a path, rewrites a JSON snapshot after every mutation so a restart
//! picks up where it left off.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use parley_core::now_ms;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{ServerError, ServerResult};

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> ServerResult<Option<String>>;

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> ServerResult<()>;

    /// Deleting an absent key is not an error
    async fn delete(&self, key: &str) -> ServerResult<()>;

    /// Live keys starting with `prefix`, in key order
    async fn list(&self, prefix: &str) -> ServerResult<Vec<String>>;

    /// Add `by` to an integer counter, creating it at zero, and return the
    /// new value. `ttl` resets the expiry.
    async fn incr(&self, key: &str, by: u64, ttl: Option<Duration>) -> ServerResult<u64>;
}

pub async fn get_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> ServerResult<Option<T>> {
    match kv.get(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + Sync>(
    kv: &dyn KvStore,
    key: &str,
    value: &T,
    ttl: Option<Duration>,
) -> ServerResult<()> {
    kv.put(key, serde_json::to_string(value)?, ttl).await
}

/// `now + ttl` in epoch ms, saturating at `i64::MAX`
pub fn expires_at(now_ms: i64, ttl: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<i64>,
}

impl Entry {
    fn new(value: String, ttl: Option<Duration>, now: i64) -> Self {
        Self {
            value,
            expires_at: ttl.map(|t| expires_at(now, t)),
        }
    }

    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<BTreeMap<String, Entry>>,
    snapshot: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON snapshot at `path`, loading it when present
    pub async fn open(path: impl Into<PathBuf>) -> ServerResult<Self> {
        let path = path.into();
        let now = now_ms();
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let mut entries: BTreeMap<String, Entry> = serde_json::from_str(&content)?;
                entries.retain(|_, e| e.is_live(now));
                info!("Loaded {} keys from {:?}", entries.len(), path);
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No snapshot at {:?}, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            entries: RwLock::new(entries),
            snapshot: Some(path),
            write_lock: Mutex::new(()),
        })
    }

    pub fn snapshot_path(&self) -> Option<&Path> {
        self.snapshot.as_deref()
    }

    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrite the snapshot from the current map. Serialization happens
    /// under the write lock so a later mutation always lands last.
    async fn persist(&self) -> ServerResult<()> {
        let Some(path) = &self.snapshot else {
            return Ok(());
        };
        let _guard = self.write_lock.lock().await;

        let content = {
            let now = now_ms();
            let mut entries = self.entries.write();
            entries.retain(|_, e| e.is_live(now));
            serde_json::to_string(&*entries)?
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = tokio::fs::set_permissions(&tmp, perms).await {
                warn!("Failed to restrict permissions on {:?}: {}", tmp, e);
            }
        }

        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ServerError::storage(format!(
                "Failed to write snapshot {:?}: {}",
                path, e
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> ServerResult<Option<String>> {
        let now = now_ms();
        Ok(self
            .entries
            .read()
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: String, ttl: Option<Duration>) -> ServerResult<()> {
        let entry = Entry::new(value, ttl, now_ms());
        self.entries.write().insert(key.to_string(), entry);
        self.persist().await
    }

    async fn delete(&self, key: &str) -> ServerResult<()> {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.persist().await?;
        }
        Ok(())
    }

    async fn list(&self, prefix: &str) -> ServerResult<Vec<String>> {
        let now = now_ms();
        Ok(self
            .entries
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn incr(&self, key: &str, by: u64, ttl: Option<Duration>) -> ServerResult<u64> {
        let now = now_ms();
        let total = {
            let mut entries = self.entries.write();
            let current = entries
                .get(key)
                .filter(|e| e.is_live(now))
                .and_then(|e| e.value.parse::<u64>().ok())
                .unwrap_or(0);
            let total = current.saturating_add(by);
            entries.insert(key.to_string(), Entry::new(total.to_string(), ttl, now));
            total
        };
        self.persist().await?;
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_expires_at_saturates() {
        assert_eq!(expires_at(1_000, Duration::from_secs(2)), 3_000);
        assert_eq!(expires_at(1_000, Duration::from_secs(u64::MAX)), i64::MAX);
        assert_eq!(expires_at(i64::MAX - 1, Duration::from_millis(5)), i64::MAX);
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_expire_immediately() {
        let kv = MemoryKv::new();
        kv.put("session:t", "x".to_string(), Some(Duration::from_secs(u64::MAX)))
            .await
            .unwrap();
        assert_eq!(kv.get("session:t").await.unwrap().as_deref(), Some("x"));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let kv = MemoryKv::new();
        kv.put("user:ana", "{}".to_string(), None).await.unwrap();
        assert_eq!(kv.get("user:ana").await.unwrap().as_deref(), Some("{}"));

        kv.delete("user:ana").await.unwrap();
        kv.delete("user:ana").await.unwrap();
        assert!(kv.get("user:ana").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_invisible() {
        let kv = MemoryKv::new();
        kv.put("session:t", "x".to_string(), Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(kv.get("session:t").await.unwrap().is_none());
        assert!(kv.list("session:").await.unwrap().is_empty());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let kv = MemoryKv::new();
        for key in ["conv:ana:2", "conv:ana:1", "conv:bob:1", "conv:anabel:1"] {
            kv.put(key, "{}".to_string(), None).await.unwrap();
        }
        assert_eq!(
            kv.list("conv:ana:").await.unwrap(),
            vec!["conv:ana:1".to_string(), "conv:ana:2".to_string()]
        );
    }

    #[tokio::test]
    async fn test_incr() {
        let kv = MemoryKv::new();
        assert_eq!(kv.incr("quota:2025-01-01", 5, None).await.unwrap(), 5);
        assert_eq!(kv.incr("quota:2025-01-01", 7, None).await.unwrap(), 12);
        assert_eq!(
            kv.get("quota:2025-01-01").await.unwrap().as_deref(),
            Some("12")
        );
    }

    #[tokio::test]
    async fn test_snapshot_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("server.json");

        let kv = MemoryKv::open(&path).await.unwrap();
        put_json(&kv, "allowed:ana", &"1", None).await.unwrap();
        kv.put("gone", "x".to_string(), Some(Duration::ZERO))
            .await
            .unwrap();
        assert!(path.exists());

        let reopened = MemoryKv::open(&path).await.unwrap();
        let value: Option<String> = get_json(&reopened, "allowed:ana").await.unwrap();
        assert_eq!(value.as_deref(), Some("1"));
        assert_eq!(reopened.len(), 1);
    }
}
