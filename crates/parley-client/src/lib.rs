//! # parley-client
//!
//! Client side of Parley: durable local conversation state, the session
//! lifecycle, last-writer-wins sync against the edge proxy, background
//! auto-sync and the conversation controller a front end drives.
//!
//! `ParleyClient` wires the pieces together from a `ClientConfig`.

pub mod api;
pub mod attachments;
pub mod completion;
pub mod controller;
pub mod error;
pub mod local_store;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod sync;
pub mod transcript;

pub use api::ApiClient;
pub use attachments::Attachment;
pub use completion::{CompletionClient, CompletionRequest, HttpCompletionClient};
pub use controller::{AlwaysConfirm, Confirm, ConversationController, SendOutcome};
pub use error::{ClientError, ClientResult, StorageError, StorageResult};
pub use local_store::{FileBackend, KeyValueBackend, LocalStore, MemoryBackend};
pub use remote::{HttpRemoteStore, MemoryRemoteStore, RemoteStore};
pub use scheduler::AutoSync;
pub use session::SessionManager;
pub use sync::{MergeReport, SyncEngine, SyncOutcome};
pub use transcript::Transcript;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parley_config::ClientConfig;

/// Fully wired client
pub struct ParleyClient {
    session: Arc<SessionManager>,
    store: Arc<LocalStore>,
    sync: SyncEngine,
    controller: Arc<ConversationController>,
    scheduler: Arc<AutoSync>,
}

impl ParleyClient {
    /// Client storing its state under the configured data directory
    pub fn open(config: &ClientConfig, confirm: Arc<dyn Confirm>) -> ClientResult<Self> {
        let data_dir = resolve_data_dir(config)?;
        Self::with_backend(config, Arc::new(FileBackend::new(data_dir)), confirm)
    }

    pub fn with_backend(
        config: &ClientConfig,
        backend: Arc<dyn KeyValueBackend>,
        confirm: Arc<dyn Confirm>,
    ) -> ClientResult<Self> {
        let api = ApiClient::new(
            config.server_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )?;
        let store = Arc::new(LocalStore::new(Arc::clone(&backend)));
        let session = Arc::new(SessionManager::new(api.clone(), backend));
        let remote: Arc<dyn RemoteStore> = Arc::new(HttpRemoteStore::new(Arc::clone(&session)));
        let sync = SyncEngine::new(
            Arc::clone(&store),
            remote,
            Arc::clone(&session),
            config.model.clone(),
        );
        let completion = Arc::new(HttpCompletionClient::new(api));
        let controller = Arc::new(ConversationController::new(
            sync.clone(),
            completion,
            confirm,
            config.model.clone(),
        ));
        let scheduler = AutoSync::new(
            sync.clone(),
            Duration::from_secs(config.sync_interval_secs),
        );

        Ok(Self {
            session,
            store,
            sync,
            controller,
            scheduler,
        })
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub fn controller(&self) -> &Arc<ConversationController> {
        &self.controller
    }

    pub fn scheduler(&self) -> &Arc<AutoSync> {
        &self.scheduler
    }

    /// Restore a persisted session and start following session changes for
    /// background sync. An expired session is cleared, not an error.
    pub async fn start(&self) -> ClientResult<()> {
        match self.session.restore().await {
            Ok(_) | Err(ClientError::Unauthorized) => {}
            Err(e) => return Err(e),
        }
        self.scheduler.follow_session();
        Ok(())
    }

    /// Stop background sync and wait for queued pushes
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        self.sync.wait_background().await;
    }
}

fn resolve_data_dir(config: &ClientConfig) -> ClientResult<PathBuf> {
    let configured = config
        .data_dir
        .as_deref()
        .and_then(parley_config::expand_tilde);
    configured
        .or_else(parley_config::default_data_dir)
        .ok_or_else(|| StorageError::other("Could not determine data directory").into())
}
