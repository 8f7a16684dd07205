//! Durable client state
//!
//! A small key-value seam (`KeyValueBackend`) with a file implementation and
//! an in-memory one, and `LocalStore` on top of it which owns the
//! conversation list. All state mutations go through `LocalStore::update`,
//! which holds an async lock across load, mutate and save.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{now_ms, LocalState};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use crate::error::{StorageError, StorageResult};

/// Conversation list and active pointer
pub const CHATS_KEY: &str = "chats_v1";
pub const TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "auth_user";

#[async_trait]
pub trait KeyValueBackend: Send + Sync {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Removing an absent key is not an error
    async fn remove(&self, key: &str) -> StorageResult<()>;
}

/// One file per key under a data directory
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(StorageError::other(format!("Invalid key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

#[async_trait]
impl KeyValueBackend for FileBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.path_for(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            if let Err(e) = tokio::fs::set_permissions(&tmp, perms).await {
                warn!("Failed to restrict permissions on {:?}: {}", tmp, e);
            }
        }

        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: parking_lot::Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueBackend for MemoryBackend {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

/// Owner of the persisted `LocalState`
pub struct LocalStore {
    backend: Arc<dyn KeyValueBackend>,
    lock: Mutex<()>,
    changes: watch::Sender<u64>,
}

impl LocalStore {
    pub fn new(backend: Arc<dyn KeyValueBackend>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            backend,
            lock: Mutex::new(()),
            changes,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    pub fn backend(&self) -> Arc<dyn KeyValueBackend> {
        Arc::clone(&self.backend)
    }

    /// Receiver bumped after every save; the render hook
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Load the state. Absent or malformed data is replaced by a fresh state
    /// with one empty conversation, and a dangling `activeId` is reset to
    /// the first conversation; either repair is persisted immediately.
    pub async fn load(&self) -> StorageResult<LocalState> {
        let _guard = self.lock.lock().await;
        self.load_locked().await
    }

    /// Atomically replace the stored state
    pub async fn save(&self, state: &LocalState) -> StorageResult<()> {
        let _guard = self.lock.lock().await;
        self.save_locked(state).await
    }

    /// Load, mutate and save under one lock
    pub async fn update<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut LocalState) -> T,
    {
        let _guard = self.lock.lock().await;
        let mut state = self.load_locked().await?;
        let out = f(&mut state);
        state.repair(now_ms());
        self.save_locked(&state).await?;
        Ok(out)
    }

    async fn load_locked(&self) -> StorageResult<LocalState> {
        let raw = self.backend.get(CHATS_KEY).await?;
        let parsed = raw.as_deref().map(serde_json::from_str::<LocalState>);

        let (mut state, mut dirty) = match parsed {
            Some(Ok(state)) => (state, false),
            Some(Err(e)) => {
                warn!("Discarding malformed local state: {}", e);
                (LocalState::fresh(now_ms()), true)
            }
            None => {
                debug!("No local state yet, starting fresh");
                (LocalState::fresh(now_ms()), true)
            }
        };

        if state.repair(now_ms()) {
            dirty = true;
        }
        if dirty {
            self.save_locked(&state).await?;
        }
        Ok(state)
    }

    async fn save_locked(&self, state: &LocalState) -> StorageResult<()> {
        let content = serde_json::to_string(state)?;
        self.backend.set(CHATS_KEY, &content).await?;
        self.changes.send_modify(|v| *v = v.wrapping_add(1));
        Ok(())
    }
}
