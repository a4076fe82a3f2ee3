/// Poll scheduler: keeps one open conversation fresh without a persistent
/// connection.
///
/// A single repeating timer per session. The fetch is awaited inline, so at
/// most one poll is ever in flight for a conversation; ticks that fire while
/// a fetch is outstanding are skipped, not queued. Transport failures are
/// absorbed and the next tick retries at the fixed interval.
use crate::session::SessionState;
use crate::transport::Transport;
use crate::types::SessionEvent;
use rand::Rng;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::debug;

pub(crate) fn spawn(
    state: Weak<SessionState>,
    transport: Arc<dyn Transport>,
    conversation_id: String,
    events: broadcast::Sender<SessionEvent>,
    poll_interval: Duration,
    jitter: Option<Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            // Read the baseline, then release both the lock and the Arc
            // before going to the network.
            let since = {
                let Some(session) = state.upgrade() else { break };
                if session.is_closed() {
                    break;
                }
                let cursor = session.store.lock().await.cursor();
                cursor
            };
            // No baseline to diff against until the initial load lands
            let Some(since) = since else { continue };

            if let Some(max) = jitter {
                let offset = rand::thread_rng().gen_range(0..=max.as_millis() as u64);
                sleep(Duration::from_millis(offset)).await;
            }

            match transport.poll_since(&conversation_id, since).await {
                Ok(batch) if !batch.is_empty() => {
                    // Stale-response guard: the view may have closed while
                    // the request was in flight.
                    let Some(session) = state.upgrade() else { break };
                    if session.is_closed() {
                        break;
                    }
                    let added = session.store.lock().await.append_incoming(batch);
                    if added > 0 {
                        let _ = events.send(SessionEvent::NewMessages { count: added });
                        let _ = events.send(SessionEvent::ScrollToLatest);
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    // Contained: polling is a background concern, the fixed
                    // interval already rate-limits the retry
                    debug!(conversation = %conversation_id, error = %e, "poll tick failed");
                }
            }
        }
    })
}
