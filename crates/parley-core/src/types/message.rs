use serde::{Deserialize, Serialize};

use crate::types::content::{Content, ContentPart};

/// Message role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single chat message. Never mutated once appended to a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Content,
    /// Epoch milliseconds
    #[serde(default)]
    pub ts: i64,
}

impl Message {
    /// Create a user message
    pub fn user(content: impl Into<String>, ts: i64) -> Self {
        Self {
            role: Role::User,
            content: Content::Text(content.into()),
            ts,
        }
    }

    /// Create a multimodal user message
    pub fn user_parts(parts: Vec<ContentPart>, ts: i64) -> Self {
        Self {
            role: Role::User,
            content: Content::Parts(parts),
            ts,
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>, ts: i64) -> Self {
        Self {
            role: Role::Assistant,
            content: Content::Text(content.into()),
            ts,
        }
    }

    /// Speaker label used in plain-text transcripts
    pub fn speaker(&self) -> &'static str {
        match self.role {
            Role::User => "You",
            Role::Assistant => "AI",
        }
    }
}
