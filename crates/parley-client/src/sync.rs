//! Reconciliation between the local store and the server.
//!
//! Last writer wins, keyed by last activity: the last message's timestamp,
//! or `createdAt` for an empty conversation. Nothing records deletions, so a
//! conversation deleted on one device comes back from any device that still
//! holds it.

use std::sync::Arc;

use parley_core::{now_ms, Conversation, RemoteConversation};
use tokio::sync::{watch, Mutex};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

use crate::error::ClientResult;
use crate::local_store::LocalStore;
use crate::remote::RemoteStore;
use crate::session::SessionManager;

/// Result of a sync operation that needs a session
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome<T> {
    /// No session, nothing was attempted
    Skipped,
    Done(T),
}

impl<T> SyncOutcome<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, SyncOutcome::Skipped)
    }

    pub fn done(self) -> Option<T> {
        match self {
            SyncOutcome::Skipped => None,
            SyncOutcome::Done(v) => Some(v),
        }
    }
}

/// What one merge pass did, by conversation id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    /// Seen only on the server, now held locally
    pub adopted: Vec<String>,
    /// Local copy replaced by a newer remote one
    pub updated: Vec<String>,
    /// Local copy newer, queued for upload
    pub pushed: Vec<String>,
    /// Same last activity on both sides
    pub unchanged: Vec<String>,
    /// Listed in the index but missing or unreadable
    pub skipped: Vec<String>,
}

impl MergeReport {
    pub fn changed_locally(&self) -> bool {
        !self.adopted.is_empty() || !self.updated.is_empty()
    }
}

#[derive(Clone)]
pub struct SyncEngine {
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    session: Arc<SessionManager>,
    model: String,
    tracker: TaskTracker,
    /// Background uploads and deletes go out one at a time
    outbound: Arc<Mutex<()>>,
}

impl SyncEngine {
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        session: Arc<SessionManager>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            remote,
            session,
            model: model.into(),
            tracker: TaskTracker::new(),
            outbound: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Bumped after every local state change, merges included
    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.store.subscribe()
    }

    /// Upload one conversation, replacing the server copy
    pub async fn persist_to_server(
        &self,
        conversation: &Conversation,
    ) -> ClientResult<SyncOutcome<()>> {
        if !self.session.is_signed_in() {
            return Ok(SyncOutcome::Skipped);
        }
        self.remote.put(conversation, &self.model).await?;
        debug!("Pushed conversation {}", conversation.id);
        Ok(SyncOutcome::Done(()))
    }

    pub async fn delete_on_server(&self, id: &str) -> ClientResult<SyncOutcome<()>> {
        if !self.session.is_signed_in() {
            return Ok(SyncOutcome::Skipped);
        }
        self.remote.delete(id).await?;
        debug!("Deleted conversation {} on server", id);
        Ok(SyncOutcome::Done(()))
    }

    /// Fire-and-forget push; failures are logged and dropped.
    ///
    /// Uploads whatever the local store holds for the conversation when the
    /// push runs, so the last push to finish always carries the newest
    /// copy. A conversation no longer held locally is not uploaded.
    pub fn spawn_push(&self, conversation: Conversation) {
        let engine = self.clone();
        self.tracker.spawn(async move {
            let _turn = engine.outbound.lock().await;
            let latest = match engine.store.load().await {
                Ok(state) => state.get(&conversation.id).cloned(),
                Err(e) => {
                    debug!("Local read before push failed: {}", e);
                    Some(conversation.clone())
                }
            };
            let Some(latest) = latest else {
                debug!("Conversation {} gone locally, not pushing", conversation.id);
                return;
            };
            if let Err(e) = engine.persist_to_server(&latest).await {
                warn!(
                    kind = e.kind(),
                    "Push of conversation {} failed: {}", latest.id, e
                );
            }
        });
    }

    /// Fire-and-forget delete; failures are logged and dropped
    pub fn spawn_delete(&self, id: String) {
        let engine = self.clone();
        self.tracker.spawn(async move {
            let _turn = engine.outbound.lock().await;
            if let Err(e) = engine.delete_on_server(&id).await {
                warn!(kind = e.kind(), "Delete of conversation {} failed: {}", id, e);
            }
        });
    }

    /// Fire-and-forget merge; failures are logged and dropped
    pub fn spawn_merge(&self) {
        let engine = self.clone();
        self.tracker.spawn(async move {
            if let Err(e) = engine.server_sync_merge().await {
                debug!(kind = e.kind(), "Background merge failed: {}", e);
            }
        });
    }

    /// Wait for every spawned push, delete and merge to finish
    pub async fn wait_background(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Pull the server's conversations and reconcile them with local state.
    ///
    /// An index failure aborts the pass with no local change. A record that
    /// is missing or unreadable is skipped. All results are applied in one
    /// local transaction after the network phase, so local edits made while
    /// the fetches ran are not lost.
    pub async fn server_sync_merge(&self) -> ClientResult<SyncOutcome<MergeReport>> {
        let Some(session) = self.session.current_session() else {
            return Ok(SyncOutcome::Skipped);
        };
        let span = tracing::info_span!("sync", username = %session.username);

        async {
            let index = self.remote.list().await?;

            let mut report = MergeReport::default();
            let mut fetched = Vec::with_capacity(index.len());
            for summary in index {
                match self.remote.get(&summary.id).await {
                    Ok(Some(record)) if !record.id.is_empty() => fetched.push(record),
                    Ok(_) => {
                        debug!("Conversation {} missing on server, skipping", summary.id);
                        report.skipped.push(summary.id);
                    }
                    Err(e) => {
                        debug!(kind = e.kind(), "Fetch of {} failed: {}", summary.id, e);
                        report.skipped.push(summary.id);
                    }
                }
            }

            let now = now_ms();
            let (report, to_push) = self
                .store
                .update(move |state| {
                    let mut to_push = Vec::new();
                    for record in fetched {
                        apply_remote(state, record, now, &mut report, &mut to_push);
                    }
                    if state.active_id.is_none() {
                        state.active_id = state.first_id();
                    }
                    (report, to_push)
                })
                .await?;

            for conversation in to_push {
                self.spawn_push(conversation);
            }

            info!(
                adopted = report.adopted.len(),
                updated = report.updated.len(),
                pushed = report.pushed.len(),
                skipped = report.skipped.len(),
                "Merge complete"
            );
            Ok(SyncOutcome::Done(report))
        }
        .instrument(span)
        .await
    }
}

fn apply_remote(
    state: &mut parley_core::LocalState,
    record: RemoteConversation,
    now: i64,
    report: &mut MergeReport,
    to_push: &mut Vec<Conversation>,
) {
    let remote_updated = record.remote_updated();
    let Some(local) = state.get_mut(&record.id) else {
        report.adopted.push(record.id.clone());
        state.items.push(record.into_conversation(now));
        return;
    };

    let local_updated = local.last_activity();
    if remote_updated > local_updated {
        if let Some(title) = record.title.filter(|t| !t.is_empty()) {
            local.title = title;
        }
        if let Some(messages) = record.messages {
            local.messages = messages;
        }
        if let Some(created_at) = record.created_at.filter(|t| *t > 0) {
            local.created_at = created_at;
        }
        report.updated.push(record.id);
    } else if local_updated > remote_updated {
        report.pushed.push(record.id);
        to_push.push(local.clone());
    } else {
        report.unchanged.push(record.id);
    }
}
