/// Conversation session: one open two-party thread.
///
/// Owns the message store, the poll task lifecycle, and the optimistic send
/// pipeline. A view layer holds one session per open conversation and tears
/// it down on exit; nothing here is global.
use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::poller;
use crate::store::MessageStore;
use crate::transport::Transport;
use crate::types::{local_message_id, DeliveryState, Message, MessageKind, SessionEvent};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// State shared with the poll task. The `closed` flag is the stale-response
/// guard: any async completion that lands after teardown observes it and
/// leaves the store untouched.
pub(crate) struct SessionState {
    pub(crate) store: tokio::sync::Mutex<MessageStore>,
    pub(crate) closed: AtomicBool,
}

impl SessionState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct ConversationSession {
    conversation_id: String,
    current_user: String,
    transport: Arc<dyn Transport>,
    config: EngineConfig,
    state: Arc<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConversationSession {
    /// The current user id is required up front; the send pipeline never
    /// guesses the sender from ambient state.
    pub fn new(
        conversation_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: EngineConfig,
    ) -> Result<Self> {
        if config.current_user.trim().is_empty() {
            return Err(ChatError::AuthRequired);
        }
        let conversation_id = conversation_id.into();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            current_user: config.current_user.clone(),
            state: Arc::new(SessionState {
                store: tokio::sync::Mutex::new(MessageStore::new(conversation_id.clone())),
                closed: AtomicBool::new(false),
            }),
            conversation_id,
            transport,
            config,
            events,
            poll_task: Mutex::new(None),
        })
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Subscribe to session events. Slow or absent subscribers never block
    /// the engine.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// One-shot history load; replaces the store contents and establishes
    /// the poll baseline.
    pub async fn open(&self) -> Result<()> {
        if self.state.is_closed() {
            return Err(ChatError::Closed);
        }
        let history = self.transport.fetch_history(&self.conversation_id).await?;
        if self.state.is_closed() {
            return Ok(());
        }
        let mut store = self.state.store.lock().await;
        store.load(history);
        info!(
            conversation = %self.conversation_id,
            messages = store.len(),
            "conversation opened"
        );
        Ok(())
    }

    /// Start the poll timer. Idempotent: any previous timer for this session
    /// is stopped first, so foreground/background cycles never stack timers.
    pub fn start_polling(&self) {
        if self.state.is_closed() {
            return;
        }
        let mut slot = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(poller::spawn(
            Arc::downgrade(&self.state),
            self.transport.clone(),
            self.conversation_id.clone(),
            self.events.clone(),
            self.config.poll_interval,
            self.config.poll_jitter,
        ));
    }

    /// Stop the poll timer (view hidden). The session stays usable.
    pub fn stop_polling(&self) {
        let mut slot = self.poll_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = slot.take() {
            task.abort();
        }
    }

    /// Tear the session down. In-flight completions become no-ops and every
    /// later call fails with `Closed`.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.stop_polling();
        debug!(conversation = %self.conversation_id, "session closed");
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    /// Optimistic send. Blank content is rejected before any I/O and is not
    /// an error. On success the pending entry is reconciled with the server
    /// echo; on failure it is rolled back and exactly one `SendFailed`
    /// notice is emitted for the attempt. Concurrent sends are fine: each
    /// carries its own local id.
    pub async fn send(&self, content: &str, kind: MessageKind) -> Result<Option<Message>> {
        if self.state.is_closed() {
            return Err(ChatError::Closed);
        }
        if content.trim().is_empty() {
            return Ok(None);
        }

        let local_id = local_message_id();
        let pending = Message {
            id: local_id.clone(),
            conversation_id: self.conversation_id.clone(),
            sender: self.current_user.clone(),
            content: content.to_string(),
            kind,
            created_at: chrono::Utc::now().timestamp_millis(),
            delivery: DeliveryState::Pending,
        };

        // Insert before any network I/O so the message shows up instantly
        self.state.store.lock().await.insert_pending(pending);
        self.emit(SessionEvent::ScrollToLatest);

        match self
            .transport
            .send_message(&self.conversation_id, content, kind)
            .await
        {
            Ok(server_msg) => {
                if self.state.is_closed() {
                    return Err(ChatError::Closed);
                }
                self.state
                    .store
                    .lock()
                    .await
                    .reconcile(&local_id, server_msg.clone());
                self.emit(SessionEvent::MessageSent {
                    local_id,
                    server_id: server_msg.id.clone(),
                });
                Ok(Some(server_msg))
            }
            Err(e) => {
                if !self.state.is_closed() {
                    self.state.store.lock().await.rollback(&local_id);
                    self.emit(SessionEvent::SendFailed { local_id });
                }
                Err(e)
            }
        }
    }

    /// Snapshot of the current message list for rendering.
    pub async fn messages(&self) -> Vec<Message> {
        self.state.store.lock().await.messages().to_vec()
    }

    pub async fn cursor(&self) -> Option<i64> {
        self.state.store.lock().await.cursor()
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for ConversationSession {
    fn drop(&mut self) {
        self.close();
    }
}
