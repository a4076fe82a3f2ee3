/// Marketchat debug client - tail and send on the most recent conversation
///
/// Lists the account's conversations, opens the newest one, polls it in the
/// background, prints incoming messages, and sends each stdin line as a
/// text message. For poking a live backend; not part of the engine API.
use marketchat_core::types::{MessageKind, SessionEvent};
use marketchat_core::{ConversationList, ConversationSession, EngineConfig, HttpTransport};
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().collect();
    let config = EngineConfig::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let transport = Arc::new(
        HttpTransport::new(&config).map_err(|e| anyhow::anyhow!("Transport error: {}", e))?,
    );

    let list = ConversationList::new(transport.clone(), config.current_user.clone())
        .map_err(|e| anyhow::anyhow!("Sign-in required: {}", e))?;
    let summaries = list.refresh().await?;

    if summaries.is_empty() {
        println!("No conversations for user {}", config.current_user);
        return Ok(());
    }

    println!("Conversations:");
    for s in &summaries {
        println!(
            "  {}  peer={}  unread={}  \"{}\"",
            s.conversation_id, s.peer_id, s.unread_count, s.last_preview
        );
    }

    let newest = &summaries[0];
    info!("Opening conversation {} with {}", newest.conversation_id, newest.peer_id);

    let session = Arc::new(ConversationSession::new(
        newest.conversation_id.clone(),
        transport,
        config.clone(),
    )?);
    session.open().await?;

    for msg in session.messages().await {
        println!("[{}] {}: {}", msg.created_at, msg.sender, msg.content);
    }

    session.start_polling();

    // Print messages as polls bring them in
    let printer = {
        let session = session.clone();
        let mut events = session.events();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let SessionEvent::NewMessages { count } = event {
                    let messages = session.messages().await;
                    let tail = messages.len().saturating_sub(count);
                    for msg in &messages[tail..] {
                        println!("[{}] {}: {}", msg.created_at, msg.sender, msg.content);
                    }
                }
            }
        })
    };

    println!("Type a message and press Enter to send (Ctrl+C to quit)");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(text) => {
                        if let Err(e) = session.send(&text, MessageKind::Text).await {
                            eprintln!("Send failed, message not delivered: {}", e);
                        }
                    }
                    None => break,
                }
            }
            _ = signal::ctrl_c() => {
                println!("Closing session");
                break;
            }
        }
    }

    session.close();
    printer.abort();
    Ok(())
}
