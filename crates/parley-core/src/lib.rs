//! # parley-core
//!
//! Data model shared by the Parley chat client and its edge proxy:
//! conversations, messages, the client's persisted state and the session
//! credential.

pub mod ids;
pub mod types;

pub use ids::new_conversation_id;
pub use types::{
    derive_title, Content, ContentPart, Conversation, ConversationSummary, ImageUrl, LocalState,
    Message, RemoteConversation, Role, Session, DEFAULT_TITLE, TITLE_MAX_CHARS,
};

/// Current wall-clock time in epoch milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
