//! User-facing conversation operations: create, select, delete, send.
//!
//! Every mutation goes through the local store first and is then pushed to
//! the server in the background.

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{derive_title, now_ms, Conversation, LocalState, Message};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, Instrument};

use crate::attachments::{to_parts, Attachment};
use crate::completion::{CompletionClient, CompletionRequest};
use crate::error::{ClientError, ClientResult};
use crate::sync::SyncEngine;
use crate::transcript::{self, Transcript};

/// Yes/no prompt shown before destructive actions
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

/// Confirms everything
pub struct AlwaysConfirm;

#[async_trait]
impl Confirm for AlwaysConfirm {
    async fn confirm(&self, _prompt: &str) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing to send
    Empty,
    /// Another completion is still running; the message was not added
    Busy,
    Replied(Message),
    /// Stopped by `cancel`; the user message stays, no reply is added
    Cancelled,
}

pub struct ConversationController {
    sync: SyncEngine,
    completion: Arc<dyn CompletionClient>,
    confirm: Arc<dyn Confirm>,
    model: String,
    inflight: Mutex<Option<CancellationToken>>,
}

/// Clears the in-flight slot however `send_message` exits
struct InflightGuard<'a>(&'a Mutex<Option<CancellationToken>>);

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().take();
    }
}

impl ConversationController {
    pub fn new(
        sync: SyncEngine,
        completion: Arc<dyn CompletionClient>,
        confirm: Arc<dyn Confirm>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            sync,
            completion,
            confirm,
            model: model.into(),
            inflight: Mutex::new(None),
        }
    }

    pub fn sync(&self) -> &SyncEngine {
        &self.sync
    }

    pub async fn state(&self) -> ClientResult<LocalState> {
        Ok(self.sync.store().load().await?)
    }

    pub async fn active(&self) -> ClientResult<Option<Conversation>> {
        Ok(self.state().await?.active().cloned())
    }

    pub fn is_generating(&self) -> bool {
        self.inflight.lock().is_some()
    }

    /// New empty conversation, made active
    pub async fn create_conversation(&self) -> ClientResult<Conversation> {
        let conversation = Conversation::new(now_ms());
        let created = conversation.clone();
        self.sync
            .store()
            .update(move |state| {
                state.active_id = Some(conversation.id.clone());
                state.items.push(conversation);
            })
            .await?;

        debug!("Created conversation {}", created.id);
        self.sync.spawn_push(created.clone());
        Ok(created)
    }

    /// Make `id` active. Returns false when there is no such conversation.
    pub async fn select_conversation(&self, id: &str) -> ClientResult<bool> {
        let found = self
            .sync
            .store()
            .update(|state| {
                let found = state.contains(id);
                if found {
                    state.active_id = Some(id.to_string());
                }
                found
            })
            .await?;
        Ok(found)
    }

    /// Delete the active conversation after confirmation. Returns the
    /// deleted id, or `None` when declined.
    ///
    /// Deleting the last conversation leaves one fresh, empty conversation.
    pub async fn delete_conversation(&self) -> ClientResult<Option<String>> {
        let Some(target) = self.active().await? else {
            return Ok(None);
        };
        let prompt = format!("Delete chat: \"{}\"?", display_title(&target));
        if !self.confirm.confirm(&prompt).await {
            return Ok(None);
        }

        let id = target.id.clone();
        self.sync
            .store()
            .update(move |state| {
                state.remove(&id);
                if state.items.is_empty() {
                    state.items.push(Conversation::new(now_ms()));
                }
                state.active_id = state.first_id();
            })
            .await?;
        self.sync.spawn_delete(target.id.clone());

        info!("Deleted conversation {}", target.id);
        Ok(Some(target.id))
    }

    /// Append a user message to the active conversation and ask for a reply.
    ///
    /// Rejected without side effects when there is nothing to send or a
    /// completion is already running. The user message is persisted and
    /// pushed before the request goes out, so it survives a failed or
    /// cancelled completion.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> ClientResult<SendOutcome> {
        let text = text.trim();
        if text.is_empty() && attachments.is_empty() {
            return Ok(SendOutcome::Empty);
        }

        let cancel = {
            let mut slot = self.inflight.lock();
            if slot.is_some() {
                return Ok(SendOutcome::Busy);
            }
            let token = CancellationToken::new();
            *slot = Some(token.clone());
            token
        };
        let _guard = InflightGuard(&self.inflight);

        let message = if attachments.is_empty() {
            Message::user(text, now_ms())
        } else {
            Message::user_parts(to_parts(text, &attachments), now_ms())
        };
        let conversation = self
            .sync
            .store()
            .update(|state| {
                let conv = state.active_mut()?;
                conv.messages.push(message);
                if conv.has_default_title() {
                    conv.title = derive_title(text);
                }
                Some(conv.clone())
            })
            .await?;
        let Some(conversation) = conversation else {
            return Ok(SendOutcome::Empty);
        };
        self.sync.spawn_push(conversation.clone());

        let span = tracing::info_span!("completion", conversation_id = %conversation.id);
        let request = CompletionRequest::from_history(&self.model, &conversation.messages);
        let result = self
            .completion
            .complete(&request, &cancel)
            .instrument(span)
            .await;

        let reply_text = match result {
            Ok(text) => text,
            Err(ClientError::Cancelled) => {
                debug!("Completion cancelled for {}", conversation.id);
                return Ok(SendOutcome::Cancelled);
            }
            Err(e) => return Err(e),
        };

        let reply = Message::assistant(reply_text, now_ms());
        let appended = reply.clone();
        let id = conversation.id.clone();
        let updated = self
            .sync
            .store()
            .update(move |state| {
                let conv = state.get_mut(&id)?;
                conv.messages.push(appended);
                Some(conv.clone())
            })
            .await?;
        if let Some(updated) = updated {
            self.sync.spawn_push(updated);
        }
        self.sync.spawn_merge();

        Ok(SendOutcome::Replied(reply))
    }

    /// Abort the running completion. Returns whether one was running.
    pub fn cancel(&self) -> bool {
        match self.inflight.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub async fn export_transcript(&self) -> ClientResult<Option<Transcript>> {
        Ok(self.active().await?.as_ref().map(transcript::render))
    }
}

fn display_title(conversation: &Conversation) -> &str {
    if conversation.title.is_empty() {
        parley_core::DEFAULT_TITLE
    } else {
        &conversation.title
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::local_store::{LocalStore, MemoryBackend};
    use crate::remote::{MemoryRemoteStore, RemoteStore};
    use crate::session::SessionManager;
    use parley_core::{Content, ContentPart, Role, Session};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Replies with a fixed text, optionally parking until released
    struct ScriptedCompletion {
        reply: ClientResult<String>,
        gate: Option<Arc<Notify>>,
        calls: AtomicUsize,
        last_request: Mutex<Option<CompletionRequest>>,
    }

    impl ScriptedCompletion {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                gate: None,
                calls: AtomicUsize::new(0),
                last_request: Mutex::new(None),
            }
        }

        fn failing(err: ClientError) -> Self {
            Self {
                reply: Err(err),
                ..Self::replying("")
            }
        }

        fn gated(text: &str, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::replying(text)
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedCompletion {
        async fn complete(
            &self,
            request: &CompletionRequest,
            cancel: &CancellationToken,
        ) -> ClientResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_request.lock() = Some(request.clone());
            if let Some(gate) = &self.gate {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                    _ = gate.notified() => {}
                }
            }
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(ClientError::QuotaExhausted) => Err(ClientError::QuotaExhausted),
                Err(e) => Err(ClientError::Transport(e.to_string())),
            }
        }
    }

    struct Decline;

    #[async_trait]
    impl Confirm for Decline {
        async fn confirm(&self, _prompt: &str) -> bool {
            false
        }
    }

    struct Harness {
        controller: Arc<ConversationController>,
        remote: Arc<MemoryRemoteStore>,
        completion: Arc<ScriptedCompletion>,
    }

    async fn harness(completion: ScriptedCompletion, confirm: Arc<dyn Confirm>) -> Harness {
        let backend = Arc::new(MemoryBackend::new());
        let store = Arc::new(LocalStore::new(backend.clone()));
        let remote = Arc::new(MemoryRemoteStore::new());
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(1)).unwrap();
        let session = Arc::new(SessionManager::new(api, backend));
        session.set_session(Session::new("tok", "curtis")).await.unwrap();
        let sync = SyncEngine::new(store, remote.clone(), session, "gpt-5");
        let completion = Arc::new(completion);
        let controller = Arc::new(ConversationController::new(
            sync,
            completion.clone(),
            confirm,
            "gpt-5",
        ));
        Harness {
            controller,
            remote,
            completion,
        }
    }

    #[tokio::test]
    async fn test_create_activates_and_pushes() {
        let h = harness(ScriptedCompletion::replying("hi"), Arc::new(AlwaysConfirm)).await;
        let created = h.controller.create_conversation().await.unwrap();

        let state = h.controller.state().await.unwrap();
        assert_eq!(state.active_id.as_deref(), Some(created.id.as_str()));
        assert_eq!(created.title, "New chat");
        assert!(created.messages.is_empty());

        h.controller.sync().wait_background().await;
        assert!(h.remote.record(&created.id).is_some());
    }

    #[tokio::test]
    async fn test_send_appends_reply_and_titles() {
        let h = harness(ScriptedCompletion::replying("Borrowing rules."), Arc::new(AlwaysConfirm)).await;
        let long = "Explain the borrow checker to me like I have never written Rust";

        let outcome = h.controller.send_message(long, vec![]).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Replied(ref m) if m.content == Content::text("Borrowing rules.")));

        let conv = h.controller.active().await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[0].role, Role::User);
        assert_eq!(conv.messages[1].role, Role::Assistant);
        assert_eq!(conv.title, format!("{}…", &long[..42]));

        h.controller.sync().wait_background().await;
        let pushed = h.remote.record(&conv.id).unwrap();
        assert_eq!(pushed.messages.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_title_is_derived_once() {
        let h = harness(ScriptedCompletion::replying("ok"), Arc::new(AlwaysConfirm)).await;
        h.controller.send_message("first", vec![]).await.unwrap();
        h.controller.send_message("second", vec![]).await.unwrap();
        assert_eq!(h.controller.active().await.unwrap().unwrap().title, "first");
    }

    #[tokio::test]
    async fn test_empty_send_is_noop() {
        let h = harness(ScriptedCompletion::replying("hi"), Arc::new(AlwaysConfirm)).await;
        let outcome = h.controller.send_message("   ", vec![]).await.unwrap();
        assert_eq!(outcome, SendOutcome::Empty);
        assert!(h.controller.active().await.unwrap().unwrap().messages.is_empty());
        assert_eq!(h.completion.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_attachments_become_parts() {
        let h = harness(ScriptedCompletion::replying("a cat"), Arc::new(AlwaysConfirm)).await;
        let image = Attachment::image("cat.png", "image/png", b"abc");
        h.controller.send_message("what is it", vec![image]).await.unwrap();

        let conv = h.controller.active().await.unwrap().unwrap();
        match &conv.messages[0].content {
            Content::Parts(parts) => {
                assert_eq!(parts[0], ContentPart::text("what is it"));
                assert!(matches!(parts[1], ContentPart::ImageUrl { .. }));
            }
            other => panic!("expected parts, got {:?}", other),
        }
        let request = h.completion.last_request.lock().clone().unwrap();
        assert_eq!(request.model, "gpt-5");
        assert_eq!(request.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_send_while_inflight_is_rejected() {
        let gate = Arc::new(Notify::new());
        let h = harness(ScriptedCompletion::gated("done", gate.clone()), Arc::new(AlwaysConfirm)).await;

        let controller = h.controller.clone();
        let first = tokio::spawn(async move { controller.send_message("one", vec![]).await });
        while h.completion.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let before = h.controller.active().await.unwrap().unwrap().messages.len();
        let outcome = h.controller.send_message("two", vec![]).await.unwrap();
        assert_eq!(outcome, SendOutcome::Busy);
        let after = h.controller.active().await.unwrap().unwrap().messages.len();
        assert_eq!(before, after);

        gate.notify_one();
        assert!(matches!(first.await.unwrap().unwrap(), SendOutcome::Replied(_)));
        assert!(!h.controller.is_generating());
    }

    #[tokio::test]
    async fn test_cancel_keeps_user_message() {
        let gate = Arc::new(Notify::new());
        let h = harness(ScriptedCompletion::gated("never", gate), Arc::new(AlwaysConfirm)).await;

        let controller = h.controller.clone();
        let pending = tokio::spawn(async move { controller.send_message("stop me", vec![]).await });
        while h.completion.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.controller.cancel());

        assert_eq!(pending.await.unwrap().unwrap(), SendOutcome::Cancelled);
        let conv = h.controller.active().await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert!(!h.controller.cancel());
    }

    #[tokio::test]
    async fn test_failure_surfaces_and_keeps_user_message() {
        let h = harness(
            ScriptedCompletion::failing(ClientError::QuotaExhausted),
            Arc::new(AlwaysConfirm),
        )
        .await;

        let err = h.controller.send_message("hello", vec![]).await.unwrap_err();
        assert!(matches!(err, ClientError::QuotaExhausted));
        let conv = h.controller.active().await.unwrap().unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert!(!h.controller.is_generating());
    }

    #[tokio::test]
    async fn test_delete_last_leaves_fresh_conversation() {
        let h = harness(ScriptedCompletion::replying("hi"), Arc::new(AlwaysConfirm)).await;
        let only = h.controller.active().await.unwrap().unwrap();
        h.remote.put(&only, "gpt-5").await.unwrap();

        let deleted = h.controller.delete_conversation().await.unwrap();
        assert_eq!(deleted.as_deref(), Some(only.id.as_str()));

        let state = h.controller.state().await.unwrap();
        assert_eq!(state.items.len(), 1);
        assert_ne!(state.items[0].id, only.id);
        assert!(state.items[0].messages.is_empty());
        assert_eq!(state.active_id.as_deref(), Some(state.items[0].id.as_str()));

        h.controller.sync().wait_background().await;
        assert!(h.remote.record(&only.id).is_none());
    }

    #[tokio::test]
    async fn test_delete_activates_first_remaining() {
        let h = harness(ScriptedCompletion::replying("hi"), Arc::new(AlwaysConfirm)).await;
        let first = h.controller.active().await.unwrap().unwrap();
        h.controller.create_conversation().await.unwrap();

        h.controller.delete_conversation().await.unwrap();
        let state = h.controller.state().await.unwrap();
        assert_eq!(state.items.len(), 1);
        assert_eq!(state.active_id, Some(first.id));
    }

    #[tokio::test]
    async fn test_declined_delete_changes_nothing() {
        let h = harness(ScriptedCompletion::replying("hi"), Arc::new(Decline)).await;
        let before = h.controller.state().await.unwrap();
        assert_eq!(h.controller.delete_conversation().await.unwrap(), None);
        assert_eq!(h.controller.state().await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_select_and_export() {
        let h = harness(ScriptedCompletion::replying("Sure."), Arc::new(AlwaysConfirm)).await;
        let first = h.controller.active().await.unwrap().unwrap();
        h.controller.create_conversation().await.unwrap();

        assert!(h.controller.select_conversation(&first.id).await.unwrap());
        assert!(!h.controller.select_conversation("missing").await.unwrap());
        h.controller.send_message("Plan a picnic", vec![]).await.unwrap();

        let transcript = h.controller.export_transcript().await.unwrap().unwrap();
        assert_eq!(transcript.file_name, "Plan_a_picnic.txt");
        assert_eq!(
            transcript.body,
            "# Plan a picnic\n\nYou: Plan a picnic\n\nAI: Sure.\n"
        );
    }
}
