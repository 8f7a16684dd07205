//! Server-side per-user conversation store

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{now_ms, Conversation, ConversationSummary, RemoteConversation};
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use crate::api::http_error;
use crate::error::{ClientError, ClientResult};
use crate::session::SessionManager;

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Index of the signed-in user's conversations, without message bodies
    async fn list(&self) -> ClientResult<Vec<ConversationSummary>>;

    /// Full record, `None` when the server has no such id
    async fn get(&self, id: &str) -> ClientResult<Option<RemoteConversation>>;

    /// Unconditional upsert
    async fn put(&self, conversation: &Conversation, model: &str) -> ClientResult<()>;

    /// Idempotent
    async fn delete(&self, id: &str) -> ClientResult<()>;
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    #[serde(default)]
    items: Vec<ConversationSummary>,
}

/// `RemoteStore` over the edge proxy's `/conversations` endpoints
pub struct HttpRemoteStore {
    session: Arc<SessionManager>,
}

impl HttpRemoteStore {
    pub fn new(session: Arc<SessionManager>) -> Self {
        Self { session }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> ClientResult<reqwest::Response> {
        let response = self
            .session
            .authorized_request(method, path, body)
            .await?
            .ok_or(ClientError::NotSignedIn)?;
        if response.status() == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized);
        }
        Ok(response)
    }
}

fn conversation_path(id: &str) -> String {
    format!("/conversations/{}", urlencoding::encode(id))
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn list(&self) -> ClientResult<Vec<ConversationSummary>> {
        let response = self.send(Method::GET, "/conversations", None).await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        let index: IndexResponse = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(index.items)
    }

    async fn get(&self, id: &str) -> ClientResult<Option<RemoteConversation>> {
        let response = self.send(Method::GET, &conversation_path(id), None).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        let record: RemoteConversation = response
            .json()
            .await
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(Some(record))
    }

    async fn put(&self, conversation: &Conversation, model: &str) -> ClientResult<()> {
        let mut body = serde_json::to_value(conversation)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".to_string(), serde_json::Value::from(model));
        }

        let response = self
            .send(Method::POST, &conversation_path(&conversation.id), Some(&body))
            .await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> ClientResult<()> {
        let response = self.send(Method::DELETE, &conversation_path(id), None).await?;
        if !response.status().is_success() && response.status() != StatusCode::NOT_FOUND {
            return Err(http_error(response).await);
        }
        Ok(())
    }
}

/// In-process `RemoteStore`, used for offline runs and tests.
///
/// Stamps `updatedAt` on every put like the real server does. Ids listed in
/// `hidden` stay in the index but answer `get` with "absent".
#[derive(Default)]
pub struct MemoryRemoteStore {
    records: parking_lot::Mutex<HashMap<String, RemoteConversation>>,
    hidden: parking_lot::Mutex<Vec<String>>,
    puts: AtomicUsize,
    lists: AtomicUsize,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as-is, bypassing stamping
    pub fn insert(&self, record: RemoteConversation) {
        self.records.lock().insert(record.id.clone(), record);
    }

    pub fn record(&self, id: &str) -> Option<RemoteConversation> {
        self.records.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keep `id` in the index but make `get` report it absent
    pub fn hide(&self, id: &str) {
        self.hidden.lock().push(id.to_string());
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn list_count(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list(&self) -> ClientResult<Vec<ConversationSummary>> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let mut items: Vec<ConversationSummary> = self
            .records
            .lock()
            .values()
            .map(|r| ConversationSummary {
                id: r.id.clone(),
                title: r.title.clone(),
                updated_at: r.updated_at,
            })
            .collect();
        for id in self.hidden.lock().iter() {
            if !items.iter().any(|s| &s.id == id) {
                items.push(ConversationSummary {
                    id: id.clone(),
                    title: None,
                    updated_at: None,
                });
            }
        }
        items.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(items)
    }

    async fn get(&self, id: &str) -> ClientResult<Option<RemoteConversation>> {
        if self.hidden.lock().iter().any(|h| h == id) {
            return Ok(None);
        }
        Ok(self.records.lock().get(id).cloned())
    }

    async fn put(&self, conversation: &Conversation, _model: &str) -> ClientResult<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let record = RemoteConversation {
            id: conversation.id.clone(),
            title: Some(conversation.title.clone()),
            created_at: Some(conversation.created_at),
            messages: Some(conversation.messages.clone()),
            updated_at: Some(now_ms()),
            username: None,
        };
        self.records.lock().insert(record.id.clone(), record);
        Ok(())
    }

    async fn delete(&self, id: &str) -> ClientResult<()> {
        self.records.lock().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiClient;
    use crate::local_store::MemoryBackend;
    use mockito::Matcher;
    use parley_core::{Message, Session};
    use serde_json::json;
    use std::time::Duration;

    async fn signed_in(url: &str) -> HttpRemoteStore {
        let api = ApiClient::new(url, Duration::from_secs(5)).unwrap();
        let sessions = Arc::new(SessionManager::new(api, Arc::new(MemoryBackend::new())));
        sessions.set_session(Session::new("tok", "curtis")).await.unwrap();
        HttpRemoteStore::new(sessions)
    }

    #[test]
    fn test_conversation_path_encoding() {
        assert_eq!(conversation_path("lq3k-ab12cd"), "/conversations/lq3k-ab12cd");
        assert_eq!(conversation_path("a b/c"), "/conversations/a%20b%2Fc");
    }

    #[tokio::test]
    async fn test_signed_out_is_not_signed_in() {
        let api = ApiClient::new("http://127.0.0.1:9", Duration::from_secs(5)).unwrap();
        let sessions = Arc::new(SessionManager::new(api, Arc::new(MemoryBackend::new())));
        let remote = HttpRemoteStore::new(sessions);
        assert!(matches!(remote.list().await, Err(ClientError::NotSignedIn)));
    }

    #[tokio::test]
    async fn test_list_and_get() {
        let mut server = mockito::Server::new_async().await;
        let _index = server
            .mock("GET", "/conversations")
            .match_header("authorization", "Bearer tok")
            .with_status(200)
            .with_body(r#"{"items":[{"id":"a","title":"Hi","updatedAt":200}]}"#)
            .create_async()
            .await;
        let _record = server
            .mock("GET", "/conversations/a")
            .with_status(200)
            .with_body(
                r#"{"id":"a","title":"Hi","createdAt":100,"updatedAt":200,"username":"curtis",
                    "messages":[{"role":"user","content":"hello","ts":150}],"extra":true}"#,
            )
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/conversations/b")
            .with_status(404)
            .with_body(r#"{"error":"Not found"}"#)
            .create_async()
            .await;

        let remote = signed_in(&server.url()).await;
        let index = remote.list().await.unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index[0].updated_at, Some(200));

        let record = remote.get("a").await.unwrap().unwrap();
        assert_eq!(record.remote_updated(), 200);
        assert_eq!(record.messages.unwrap()[0], Message::user("hello", 150));

        assert!(remote.get("b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_sends_model() {
        let mut server = mockito::Server::new_async().await;
        let conv = Conversation::new(100);
        let mock = server
            .mock("POST", format!("/conversations/{}", conv.id).as_str())
            .match_header("authorization", "Bearer tok")
            .match_body(Matcher::PartialJson(json!({
                "id": conv.id,
                "title": "New chat",
                "createdAt": 100,
                "messages": [],
                "model": "gpt-5",
            })))
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .create_async()
            .await;

        let remote = signed_in(&server.url()).await;
        remote.put(&conv, "gpt-5").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_put_failure_is_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", Matcher::Regex(r"^/conversations/.*".to_string()))
            .with_status(500)
            .with_body(r#"{"error":"boom"}"#)
            .create_async()
            .await;

        let remote = signed_in(&server.url()).await;
        let err = remote.put(&Conversation::new(1), "gpt-5").await.unwrap_err();
        assert!(matches!(err, ClientError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/conversations/a")
            .with_status(200)
            .with_body(r#"{"ok":true}"#)
            .expect(2)
            .create_async()
            .await;

        let remote = signed_in(&server.url()).await;
        remote.delete("a").await.unwrap();
        remote.delete("a").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_memory_store_stamps_updated_at() {
        let store = MemoryRemoteStore::new();
        let conv = Conversation::new(5);
        store.put(&conv, "gpt-5").await.unwrap();

        let record = store.record(&conv.id).unwrap();
        assert!(record.updated_at.unwrap() >= 5);
        assert_eq!(store.put_count(), 1);

        store.hide(&conv.id);
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.get(&conv.id).await.unwrap().is_none());
    }
}
