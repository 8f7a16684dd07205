//! # parley-server
//!
//! Edge proxy for the Parley chat client: username/password sessions,
//! per-user conversation storage and completion forwarding under a
//! site-wide daily token quota.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod kv;
pub mod server;
pub mod state;

pub use error::{ServerError, ServerResult};
pub use kv::{KvStore, MemoryKv};
pub use server::{build_app, run_server, run_server_with_shutdown};
pub use state::AppState;
