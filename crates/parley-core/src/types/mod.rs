pub mod content;
pub mod conversation;
pub mod message;
pub mod session;
pub mod state;

pub use content::{Content, ContentPart, ImageUrl};
pub use conversation::{
    derive_title, Conversation, ConversationSummary, RemoteConversation, DEFAULT_TITLE,
    TITLE_MAX_CHARS,
};
pub use message::{Message, Role};
pub use session::Session;
pub use state::LocalState;
