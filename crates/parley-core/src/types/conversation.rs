use serde::{Deserialize, Serialize};

use crate::ids::new_conversation_id;
use crate::types::message::Message;

/// Title given to conversations until the first message names them
pub const DEFAULT_TITLE: &str = "New chat";

/// Number of characters of the first message kept in a derived title
pub const TITLE_MAX_CHARS: usize = 42;

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

/// A titled, ordered sequence of chat messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    #[serde(default = "default_title")]
    pub title: String,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl Conversation {
    /// Fresh, empty conversation with a new id
    pub fn new(now_ms: i64) -> Self {
        Self {
            id: new_conversation_id(now_ms),
            title: default_title(),
            created_at: now_ms,
            messages: Vec::new(),
        }
    }

    /// Timestamp used for merge precedence: the last message's time, or the
    /// creation time when there are no messages.
    pub fn last_activity(&self) -> i64 {
        match self.messages.last() {
            Some(last) if last.ts > 0 => last.ts,
            _ => self.created_at,
        }
    }

    /// Whether the title was never derived from a message
    pub fn has_default_title(&self) -> bool {
        self.title.is_empty() || self.title == DEFAULT_TITLE
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Derive a conversation title from the first message text
pub fn derive_title(text: &str) -> String {
    let base = if text.is_empty() { DEFAULT_TITLE } else { text };
    let mut title: String = base.chars().take(TITLE_MAX_CHARS).collect();
    if base.chars().count() > TITLE_MAX_CHARS {
        title.push('…');
    }
    title
}

/// Row of the remote conversation index (no message bodies)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub updated_at: Option<i64>,
}

/// Conversation record as held by the server.
///
/// Every field except `id` is optional because records written by other
/// clients are not trusted to be complete.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl RemoteConversation {
    /// `updatedAt`, falling back to `createdAt`, falling back to 0
    pub fn remote_updated(&self) -> i64 {
        self.updated_at
            .filter(|t| *t > 0)
            .or(self.created_at.filter(|t| *t > 0))
            .unwrap_or(0)
    }

    /// Local copy of a conversation seen only on the server
    pub fn into_conversation(self, now_ms: i64) -> Conversation {
        Conversation {
            id: self.id,
            title: self.title.unwrap_or_else(default_title),
            created_at: self.created_at.filter(|t| *t > 0).unwrap_or(now_ms),
            messages: self.messages.unwrap_or_default(),
        }
    }
}
