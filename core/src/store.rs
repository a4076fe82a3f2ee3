/// Message store: the client-side view of one conversation's history.
///
/// Owns ordering, idempotent merge of polled batches, and the
/// reconcile/rollback half of the optimistic send pipeline. Pure and
/// synchronous; all I/O lives in the session that wraps it.
use crate::types::{DeliveryState, Message};
use std::collections::HashSet;
use tracing::{debug, warn};

pub struct MessageStore {
    conversation_id: String,
    /// Ascending by `created_at`, ties kept in arrival order
    messages: Vec<Message>,
    /// Every id currently in `messages`
    ids: HashSet<String>,
    /// Watermark of the newest server timestamp incorporated; only moves forward
    cursor: Option<i64>,
}

impl MessageStore {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            ids: HashSet::new(),
            cursor: None,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn cursor(&self) -> Option<i64> {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Replace the store contents with the initial history page.
    ///
    /// The batch is stable-sorted ascending by `created_at`; duplicate ids
    /// within the page are dropped. The cursor is set to the newest
    /// timestamp, or left unset when the page is empty.
    pub fn load(&mut self, mut batch: Vec<Message>) {
        batch.sort_by_key(|m| m.created_at);

        self.messages.clear();
        self.ids.clear();
        for mut msg in batch {
            if !self.ids.insert(msg.id.clone()) {
                continue;
            }
            msg.delivery = DeliveryState::Sent;
            self.messages.push(msg);
        }
        self.advance_cursor(self.messages.last().map(|m| m.created_at));
    }

    /// Merge a polled batch. Messages whose id is already present are
    /// dropped; the rest are inserted in timestamp order, equal timestamps
    /// keeping arrival order. Returns how many messages were incorporated.
    pub fn append_incoming(&mut self, batch: Vec<Message>) -> usize {
        let mut added = 0;
        let mut newest: Option<i64> = None;

        for mut msg in batch {
            if self.ids.contains(&msg.id) {
                continue;
            }
            msg.delivery = DeliveryState::Sent;
            newest = Some(newest.map_or(msg.created_at, |n| n.max(msg.created_at)));
            self.ids.insert(msg.id.clone());
            let at = self
                .messages
                .partition_point(|m| m.created_at <= msg.created_at);
            self.messages.insert(at, msg);
            added += 1;
        }

        self.advance_cursor(newest);
        added
    }

    /// Append an optimistic pending message at the tail.
    ///
    /// The local clock is assumed to be at or past the tail of the list;
    /// when it is not, the timestamp is clamped up to the tail so ordering
    /// stays non-decreasing. The cursor does not move: pending entries are
    /// not server state.
    pub fn insert_pending(&mut self, mut msg: Message) {
        if let Some(tail) = self.messages.last() {
            msg.created_at = msg.created_at.max(tail.created_at);
        }
        msg.delivery = DeliveryState::Pending;
        self.ids.insert(msg.id.clone());
        self.messages.push(msg);
    }

    /// Replace the pending entry `local_id` with its server-confirmed echo.
    ///
    /// The replacement happens in place, so two concurrent sends keep their
    /// original send order even when the server confirms them out of order.
    /// If a racing poll already merged the server copy, the pending entry
    /// is dropped instead of duplicated. An unknown `local_id` falls back
    /// to the normal merge path so the confirmed message is never lost.
    pub fn reconcile(&mut self, local_id: &str, mut server_msg: Message) -> bool {
        server_msg.delivery = DeliveryState::Sent;
        let created_at = server_msg.created_at;

        match self.position_of(local_id) {
            Some(at) => {
                self.ids.remove(local_id);
                if self.ids.contains(&server_msg.id) {
                    // Poll got here first; keep the merged copy
                    self.messages.remove(at);
                } else {
                    self.ids.insert(server_msg.id.clone());
                    self.messages[at] = server_msg;
                    self.restore_order(at);
                }
                self.advance_cursor(Some(created_at));
                true
            }
            None => {
                debug!(
                    conversation = %self.conversation_id,
                    local_id,
                    "reconcile target not found, merging server message"
                );
                self.append_incoming(vec![server_msg]);
                false
            }
        }
    }

    /// Remove a pending entry after a failed send. Unknown ids are benign:
    /// a duplicate completion callback must not disturb the store.
    pub fn rollback(&mut self, local_id: &str) -> bool {
        match self.position_of(local_id) {
            Some(at) => {
                self.ids.remove(local_id);
                self.messages.remove(at);
                true
            }
            None => {
                warn!(
                    conversation = %self.conversation_id,
                    local_id,
                    "rollback target not found, ignoring"
                );
                false
            }
        }
    }

    /// In-place replacement keeps adjacent concurrent sends in send order,
    /// but a racing poll may have merged a newer peer message behind the
    /// pending slot before the echo existed server-side. When the
    /// replacement lands out of order against a neighbor, move it to its
    /// timestamp slot.
    fn restore_order(&mut self, at: usize) {
        let ts = self.messages[at].created_at;
        let before_ok = at == 0 || self.messages[at - 1].created_at <= ts;
        let after_ok = at + 1 == self.messages.len() || ts <= self.messages[at + 1].created_at;
        if before_ok && after_ok {
            return;
        }
        let msg = self.messages.remove(at);
        let idx = self.messages.partition_point(|m| m.created_at <= ts);
        self.messages.insert(idx, msg);
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    fn advance_cursor(&mut self, candidate: Option<i64>) {
        if let Some(ts) = candidate {
            self.cursor = Some(self.cursor.map_or(ts, |c| c.max(ts)));
        }
    }
}
