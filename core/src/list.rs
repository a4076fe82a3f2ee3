/// Conversation list aggregation: derive the list view from raw records.
use crate::error::{ChatError, Result};
use crate::transport::Transport;
use crate::types::{Conversation, ConversationSummary};
use std::sync::Arc;
use tracing::warn;

pub struct ConversationList {
    transport: Arc<dyn Transport>,
    current_user: String,
}

impl ConversationList {
    /// Fails closed when no authenticated user id is available: the
    /// aggregator cannot resolve "the other participant" by guessing.
    pub fn new(transport: Arc<dyn Transport>, current_user: impl Into<String>) -> Result<Self> {
        let current_user = current_user.into();
        if current_user.trim().is_empty() {
            return Err(ChatError::AuthRequired);
        }
        Ok(Self {
            transport,
            current_user,
        })
    }

    /// One-shot fetch + summarize. Called on view activation and explicit
    /// pull-to-refresh; the list level never polls in the background.
    pub async fn refresh(&self) -> Result<Vec<ConversationSummary>> {
        let raw = self.transport.list_conversations().await?;
        Ok(summarize(&self.current_user, raw))
    }

    /// Create-or-get a conversation with another user, e.g. from a
    /// marketplace listing's contact button. Returns the conversation id.
    pub async fn start_with(
        &self,
        target_user_id: &str,
        linked_item_id: Option<&str>,
    ) -> Result<String> {
        self.transport
            .start_conversation(target_user_id, linked_item_id)
            .await
    }
}

/// Pure aggregation: resolve the other participant and the current user's
/// unread counter for each record, newest conversation first, threads
/// without messages last. Records that do not involve the current user at
/// all are malformed and dropped.
pub fn summarize(current_user: &str, raw: Vec<Conversation>) -> Vec<ConversationSummary> {
    let mut summaries: Vec<ConversationSummary> = raw
        .into_iter()
        .filter_map(|c| {
            let (peer_id, unread_count) = if c.participant_a == current_user {
                (c.participant_b, c.unread_count_a)
            } else if c.participant_b == current_user {
                (c.participant_a, c.unread_count_b)
            } else {
                warn!(conversation = %c.id, "record does not involve current user, dropping");
                return None;
            };
            Some(ConversationSummary {
                conversation_id: c.id,
                peer_id,
                last_preview: c
                    .last_message
                    .as_ref()
                    .map(|m| m.content.clone())
                    .unwrap_or_default(),
                last_timestamp: c.last_message.map(|m| m.created_at),
                unread_count,
                linked_item: c.linked_item,
            })
        })
        .collect();

    // Descending by last activity; None (no messages yet) sorts last
    summaries.sort_by(|a, b| b.last_timestamp.cmp(&a.last_timestamp));
    summaries
}
