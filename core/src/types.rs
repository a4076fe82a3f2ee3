/// Shared types for the conversation engine
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for client-generated message ids. The backend never issues ids
/// with this prefix, so a pending entry can never collide with a server row.
pub const LOCAL_ID_PREFIX: &str = "local-";

/// Generate a local id for an optimistically inserted message.
pub fn local_message_id() -> String {
    format!("{}{}", LOCAL_ID_PREFIX, Uuid::new_v4())
}

/// Whether an id was generated client-side.
pub fn is_local_id(id: &str) -> bool {
    id.starts_with(LOCAL_ID_PREFIX)
}

/// Inline preview of the most recent message, as carried on a conversation
/// record. Its timestamp is a monotonic summary: never behind any message
/// actually stored for the conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessage {
    pub content: String,
    /// Unix epoch milliseconds
    pub created_at: i64,
}

/// A raw two-party conversation record as returned by `GET /conversations`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub participant_a: String,
    pub participant_b: String,
    pub last_message: Option<LastMessage>,
    pub unread_count_a: u32,
    pub unread_count_b: u32,
    /// Marketplace listing this thread was started from, if any
    pub linked_item: Option<String>,
}

/// Message payload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// Client-side delivery state. Wire messages are always confirmed, so the
/// field defaults to `Sent` when absent from a payload and is never sent back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    #[default]
    Sent,
    Failed,
}

/// One message in a conversation. `id` is either a server id or a
/// `local-`-prefixed provisional id while the send is in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Unix epoch milliseconds
    pub created_at: i64,
    #[serde(default, skip_serializing)]
    pub delivery: DeliveryState,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }
}

/// Summary of one conversation thread, derived for the list view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    /// The other participant's user id
    pub peer_id: String,
    /// Preview text of the last message (empty when no messages yet)
    pub last_preview: String,
    /// Timestamp of the last message, if any
    pub last_timestamp: Option<i64>,
    /// Unread count for the current user's side of the thread
    pub unread_count: u32,
    pub linked_item: Option<String>,
}

/// Notifications a session broadcasts to its view layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A poll incorporated new messages into the store
    NewMessages { count: usize },
    /// The view should scroll to the newest message
    ScrollToLatest,
    /// An optimistic send was confirmed by the server
    MessageSent { local_id: String, server_id: String },
    /// An optimistic send failed and was rolled back; the user may retry
    SendFailed { local_id: String },
}
