/// Engine tests: session lifecycle, optimistic send pipeline, poll
/// scheduling, and list aggregation against an in-memory transport.
/// Scheduler tests run on paused virtual time.
use async_trait::async_trait;
use marketchat_core::types::{
    is_local_id, Conversation, DeliveryState, LastMessage, Message, MessageKind, SessionEvent,
};
use marketchat_core::{
    ChatError, ConversationList, ConversationSession, EngineConfig, Result, Transport,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

fn msg(id: &str, created_at: i64) -> Message {
    Message {
        id: id.to_string(),
        conversation_id: "c1".to_string(),
        sender: "bob".to_string(),
        content: format!("message {}", id),
        kind: MessageKind::Text,
        created_at,
        delivery: DeliveryState::Sent,
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        current_user: "alice".to_string(),
        poll_interval: Duration::from_secs(3),
        request_timeout: Duration::from_secs(3),
        ..Default::default()
    }
}

/// Scripted step for a poll or send call; when the script runs dry, polls
/// return an empty batch and sends fail.
enum Step {
    Ok(Vec<Message>),
    Fail,
}

struct MockTransport {
    history: Vec<Message>,
    conversations: Vec<Conversation>,
    poll_script: Mutex<VecDeque<Step>>,
    send_script: Mutex<VecDeque<Step>>,
    /// How long each poll request stays in flight (virtual time)
    poll_delay: Duration,
    send_delay: Duration,
    poll_calls: AtomicUsize,
    send_calls: AtomicUsize,
    polls_in_flight: AtomicUsize,
    max_polls_in_flight: AtomicUsize,
}

impl MockTransport {
    fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            conversations: Vec::new(),
            poll_script: Mutex::new(VecDeque::new()),
            send_script: Mutex::new(VecDeque::new()),
            poll_delay: Duration::ZERO,
            send_delay: Duration::ZERO,
            poll_calls: AtomicUsize::new(0),
            send_calls: AtomicUsize::new(0),
            polls_in_flight: AtomicUsize::new(0),
            max_polls_in_flight: AtomicUsize::new(0),
        }
    }

    fn script_poll(&self, step: Step) {
        self.poll_script.lock().unwrap().push_back(step);
    }

    fn script_send(&self, step: Step) {
        self.send_script.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.conversations.clone())
    }

    async fn start_conversation(
        &self,
        target_user_id: &str,
        _linked_item_id: Option<&str>,
    ) -> Result<String> {
        Ok(format!("conv-{}", target_user_id))
    }

    async fn fetch_history(&self, _conversation_id: &str) -> Result<Vec<Message>> {
        Ok(self.history.clone())
    }

    async fn poll_since(&self, _conversation_id: &str, _since: i64) -> Result<Vec<Message>> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.polls_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_polls_in_flight.fetch_max(now, Ordering::SeqCst);
        sleep(self.poll_delay).await;
        self.polls_in_flight.fetch_sub(1, Ordering::SeqCst);

        let step = self.poll_script.lock().unwrap().pop_front();
        match step {
            Some(Step::Ok(batch)) => Ok(batch),
            Some(Step::Fail) => Err(ChatError::Transport("connection reset".to_string())),
            None => Ok(Vec::new()),
        }
    }

    async fn send_message(
        &self,
        _conversation_id: &str,
        _content: &str,
        _kind: MessageKind,
    ) -> Result<Message> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        sleep(self.send_delay).await;
        let step = self.send_script.lock().unwrap().pop_front();
        match step {
            Some(Step::Ok(mut batch)) => Ok(batch.remove(0)),
            _ => Err(ChatError::Transport("connection reset".to_string())),
        }
    }
}

fn session_with(transport: Arc<MockTransport>) -> ConversationSession {
    ConversationSession::new("c1", transport, config()).unwrap()
}

#[tokio::test]
async fn open_loads_history_and_sets_baseline() {
    let transport = Arc::new(MockTransport::new(vec![msg("1", 100), msg("2", 200)]));
    let session = session_with(transport);
    session.open().await.unwrap();

    let messages = session.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(session.cursor().await, Some(200));
}

#[tokio::test(start_paused = true)]
async fn poll_merges_new_messages_and_notifies() {
    let transport = Arc::new(MockTransport::new(vec![msg("1", 100)]));
    transport.script_poll(Step::Ok(vec![msg("2", 150)]));

    let session = session_with(transport.clone());
    session.open().await.unwrap();
    let mut events = session.events();
    session.start_polling();

    sleep(Duration::from_secs(1)).await;

    let messages = session.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, "2");
    assert_eq!(session.cursor().await, Some(150));

    match events.recv().await.unwrap() {
        SessionEvent::NewMessages { count } => assert_eq!(count, 1),
        other => panic!("expected NewMessages, got {:?}", other),
    }
    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::ScrollToLatest
    ));
    session.close();
}

#[tokio::test(start_paused = true)]
async fn poll_without_baseline_issues_no_requests() {
    // Empty history: no cursor, nothing to diff against
    let transport = Arc::new(MockTransport::new(Vec::new()));
    let session = session_with(transport.clone());
    session.open().await.unwrap();
    session.start_polling();

    sleep(Duration::from_secs(10)).await;
    assert_eq!(transport.poll_calls.load(Ordering::SeqCst), 0);
    session.close();
}

#[tokio::test(start_paused = true)]
async fn slow_poll_never_overlaps_with_the_next_tick() {
    // Each poll takes longer than two intervals; ticks that fire while a
    // request is outstanding must be dropped, not queued
    let mut transport = MockTransport::new(vec![msg("1", 100)]);
    transport.poll_delay = Duration::from_secs(7);
    let transport = Arc::new(transport);

    let session = session_with(transport.clone());
    session.open().await.unwrap();
    session.start_polling();

    sleep(Duration::from_secs(30)).await;
    session.close();

    assert_eq!(transport.max_polls_in_flight.load(Ordering::SeqCst), 1);
    let calls = transport.poll_calls.load(Ordering::SeqCst);
    // ~30s of virtual time at 7s+ per cycle: far fewer calls than ticks
    assert!(calls >= 2 && calls <= 5, "unexpected poll count {}", calls);
}

#[tokio::test(start_paused = true)]
async fn poll_failure_is_absorbed_and_retried() {
    let transport = Arc::new(MockTransport::new(vec![msg("1", 100)]));
    transport.script_poll(Step::Fail);
    transport.script_poll(Step::Ok(vec![msg("2", 150)]));

    let session = session_with(transport.clone());
    session.open().await.unwrap();
    session.start_polling();

    sleep(Duration::from_secs(10)).await;
    session.close();

    // The failed tick changed nothing; the next tick delivered the batch
    assert_eq!(session.messages().await.len(), 2);
    assert!(transport.poll_calls.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(start_paused = true)]
async fn restarting_polling_replaces_the_previous_timer() {
    let mut transport = MockTransport::new(vec![msg("1", 100)]);
    transport.poll_delay = Duration::from_secs(1);
    let transport = Arc::new(transport);

    let session = session_with(transport.clone());
    session.open().await.unwrap();
    session.start_polling();
    session.start_polling();
    session.start_polling();

    sleep(Duration::from_secs(10)).await;
    session.close();

    // One timer worth of requests, never two schedulers running at once
    assert_eq!(transport.max_polls_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn closed_session_stops_polling() {
    let transport = Arc::new(MockTransport::new(vec![msg("1", 100)]));
    let session = session_with(transport.clone());
    session.open().await.unwrap();
    session.start_polling();

    sleep(Duration::from_secs(7)).await;
    session.close();
    let calls_at_close = transport.poll_calls.load(Ordering::SeqCst);

    sleep(Duration::from_secs(30)).await;
    assert_eq!(transport.poll_calls.load(Ordering::SeqCst), calls_at_close);
}

#[tokio::test]
async fn send_reconciles_against_server_echo() {
    let transport = Arc::new(MockTransport::new(vec![msg("1", 100)]));
    transport.script_send(Step::Ok(vec![msg("srv-2", 150)]));

    let session = session_with(transport.clone());
    session.open().await.unwrap();
    let mut events = session.events();

    let sent = session.send("hello", MessageKind::Text).await.unwrap();
    assert_eq!(sent.unwrap().id, "srv-2");

    let messages = session.messages().await;
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].id, "srv-2");
    assert!(!is_local_id(&messages[1].id));
    assert_eq!(messages[1].delivery, DeliveryState::Sent);
    assert_eq!(session.cursor().await, Some(150));

    assert!(matches!(
        events.recv().await.unwrap(),
        SessionEvent::ScrollToLatest
    ));
    match events.recv().await.unwrap() {
        SessionEvent::MessageSent { local_id, server_id } => {
            assert!(is_local_id(&local_id));
            assert_eq!(server_id, "srv-2");
        }
        other => panic!("expected MessageSent, got {:?}", other),
    }
}

#[tokio::test]
async fn failed_send_rolls_back_and_notifies_once() {
    let transport = Arc::new(MockTransport::new(vec![msg("1", 100)]));
    transport.script_send(Step::Fail);

    let session = session_with(transport.clone());
    session.open().await.unwrap();
    let mut events = session.events();

    let err = session.send("hello", MessageKind::Text).await.unwrap_err();
    assert!(matches!(err, ChatError::Transport(_)));

    // Store is back to the pre-send state
    let messages = session.messages().await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "1");

    // Exactly one failure notice for the attempt
    let mut failures = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, SessionEvent::SendFailed { .. }) {
            failures += 1;
        }
    }
    assert_eq!(failures, 1);
}

#[tokio::test]
async fn blank_content_is_rejected_without_network() {
    let transport = Arc::new(MockTransport::new(Vec::new()));
    let session = session_with(transport.clone());
    session.open().await.unwrap();

    assert!(session.send("", MessageKind::Text).await.unwrap().is_none());
    assert!(session.send("   \n", MessageKind::Text).await.unwrap().is_none());
    assert_eq!(transport.send_calls.load(Ordering::SeqCst), 0);
    assert!(session.messages().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn late_send_completion_does_not_mutate_closed_store() {
    let mut transport = MockTransport::new(vec![msg("1", 100)]);
    transport.send_delay = Duration::from_secs(5);
    let transport = Arc::new(transport);
    transport.script_send(Step::Ok(vec![msg("srv-2", 150)]));

    let session = Arc::new(session_with(transport));
    session.open().await.unwrap();

    let sender = {
        let session = session.clone();
        tokio::spawn(async move { session.send("hello", MessageKind::Text).await })
    };

    // Close while the send is in flight
    sleep(Duration::from_secs(1)).await;
    session.close();
    let snapshot_at_close = session.messages().await;

    let result = sender.await.unwrap();
    assert!(matches!(result, Err(ChatError::Closed)));

    let after = session.messages().await;
    assert_eq!(after.len(), snapshot_at_close.len());
    assert_eq!(session.cursor().await, Some(100));
}

#[tokio::test]
async fn send_on_closed_session_is_refused() {
    let transport = Arc::new(MockTransport::new(Vec::new()));
    let session = session_with(transport.clone());
    session.close();

    assert!(matches!(
        session.send("hello", MessageKind::Text).await,
        Err(ChatError::Closed)
    ));
    assert_eq!(transport.send_calls.load(Ordering::SeqCst), 0);
}

// ─── Conversation list ───────────────────────────────────────────────────────

fn conversation(
    id: &str,
    a: &str,
    b: &str,
    last: Option<(&str, i64)>,
    unread_a: u32,
    unread_b: u32,
) -> Conversation {
    Conversation {
        id: id.to_string(),
        participant_a: a.to_string(),
        participant_b: b.to_string(),
        last_message: last.map(|(content, created_at)| LastMessage {
            content: content.to_string(),
            created_at,
        }),
        unread_count_a: unread_a,
        unread_count_b: unread_b,
        linked_item: None,
    }
}

#[test]
fn summaries_resolve_peer_and_own_unread_slot() {
    let raw = vec![
        conversation("c1", "alice", "bob", Some(("hi", 100)), 3, 7),
        conversation("c2", "carol", "alice", Some(("yo", 200)), 1, 4),
    ];
    let summaries = marketchat_core::list::summarize("alice", raw);

    assert_eq!(summaries.len(), 2);
    // c2 has the newer last message, so it sorts first
    assert_eq!(summaries[0].conversation_id, "c2");
    assert_eq!(summaries[0].peer_id, "carol");
    assert_eq!(summaries[0].unread_count, 4);
    assert_eq!(summaries[1].peer_id, "bob");
    assert_eq!(summaries[1].unread_count, 3);
}

#[test]
fn conversations_without_messages_sort_last() {
    let raw = vec![
        conversation("empty", "alice", "bob", None, 0, 0),
        conversation("active", "alice", "carol", Some(("hello", 500)), 0, 0),
    ];
    let summaries = marketchat_core::list::summarize("alice", raw);

    assert_eq!(summaries[0].conversation_id, "active");
    assert_eq!(summaries[1].conversation_id, "empty");
    assert_eq!(summaries[1].last_preview, "");
    assert_eq!(summaries[1].last_timestamp, None);
}

#[test]
fn foreign_records_are_dropped() {
    let raw = vec![
        conversation("c1", "bob", "carol", Some(("psst", 100)), 1, 1),
        conversation("c2", "alice", "bob", Some(("hi", 50)), 0, 0),
    ];
    let summaries = marketchat_core::list::summarize("alice", raw);
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].conversation_id, "c2");
}

#[test]
fn list_requires_an_authenticated_user() {
    let transport = Arc::new(MockTransport::new(Vec::new()));
    assert!(matches!(
        ConversationList::new(transport, ""),
        Err(ChatError::AuthRequired)
    ));
}

#[tokio::test]
async fn refresh_returns_summaries_for_current_user() {
    let mut transport = MockTransport::new(Vec::new());
    transport.conversations = vec![conversation("c1", "alice", "bob", Some(("hi", 100)), 2, 9)];
    let transport = Arc::new(transport);

    let list = ConversationList::new(transport, "alice").unwrap();
    let summaries = list.refresh().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].peer_id, "bob");
    assert_eq!(summaries[0].unread_count, 2);
}
