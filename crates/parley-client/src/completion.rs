//! Chat completion through the edge proxy

use async_trait::async_trait;
use parley_core::{Content, Message, Role};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::error::{ClientError, ClientResult};

pub const NON_TEXT_REPLY: &str = "[non-text response]";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Content,
}

/// Body of `POST /`
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
}

impl CompletionRequest {
    /// Full history, timestamps dropped
    pub fn from_history(model: impl Into<String>, history: &[Message]) -> Self {
        Self {
            model: model.into(),
            messages: history
                .iter()
                .map(|m| ChatMessage {
                    role: m.role,
                    content: m.content.clone(),
                })
                .collect(),
        }
    }
}

#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Assistant reply text. Resolves to `Cancelled` as soon as `cancel`
    /// fires.
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> ClientResult<String>;
}

pub struct HttpCompletionClient {
    api: ApiClient,
}

impl HttpCompletionClient {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn send(&self, request: &CompletionRequest) -> ClientResult<String> {
        let response = self
            .api
            .request(Method::POST, "/")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ClientError::QuotaExhausted);
        }
        if !status.is_success() {
            let message = if body.is_empty() {
                format!("HTTP {}", status.as_u16())
            } else {
                body
            };
            return Err(ClientError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let data: serde_json::Value = serde_json::from_str(&body)
            .map_err(|_| ClientError::InvalidResponse("Invalid JSON from server".to_string()))?;
        Ok(reply_text(&data))
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> ClientResult<String> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(ClientError::Cancelled),
            result = self.send(request) => result,
        }
    }
}

/// `choices[0].message.content`, trimmed; anything but a string becomes a
/// placeholder
pub fn reply_text(data: &serde_json::Value) -> String {
    match data.pointer("/choices/0/message/content") {
        Some(serde_json::Value::String(text)) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                text.clone()
            } else {
                trimmed.to_string()
            }
        }
        _ => NON_TEXT_REPLY.to_string(),
    }
}
