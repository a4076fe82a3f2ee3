/// Marketchat - Conversation Synchronization Engine
///
/// Client-side engine for two-party marketplace chat over a polling
/// transport: eventually-consistent message history with strict ordering
/// and idempotent merges, optimistic sends with reconcile-or-rollback,
/// and per-conversation poll scheduling bound to view lifecycle.

pub mod config;
pub mod error;
pub mod list;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

mod poller;

pub use config::EngineConfig;
pub use error::{ChatError, Result};
pub use list::ConversationList;
pub use session::ConversationSession;
pub use store::MessageStore;
pub use transport::{HttpTransport, Transport};
