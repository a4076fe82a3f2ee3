/// Configuration management
use crate::error::{ChatError, Result};
use std::time::Duration;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Backend base URL, e.g. "https://api.example.com"
    pub base_url: String,

    /// Bearer token for the Authorization header, when a session exists
    pub bearer_token: Option<String>,

    /// The authenticated user's id. Required: the list aggregator and the
    /// send pipeline refuse to guess which participant slot is "us".
    pub current_user: String,

    /// Fixed interval between poll ticks for an open conversation
    pub poll_interval: Duration,

    /// Per-request timeout; a hung request counts as a failed poll tick
    pub request_timeout: Duration,

    /// Optional uniform jitter added before each poll fetch
    pub poll_jitter: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            bearer_token: None,
            current_user: String::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            // Capped at one poll interval so in-flight polls cannot accumulate
            request_timeout: DEFAULT_POLL_INTERVAL,
            poll_jitter: None,
        }
    }
}

impl EngineConfig {
    /// Create config from command line arguments (debug binary).
    ///
    /// Usage: marketchat <base_url> <user_id> [--token <t>] [--poll-ms <n>] [--jitter-ms <n>]
    pub fn from_args(args: &[String]) -> Result<Self> {
        if args.len() < 3 {
            return Err(ChatError::Config(format!(
                "Usage: {} <base_url> <user_id> [--token <token>] [--poll-ms <n>] [--jitter-ms <n>]",
                args.first().map(String::as_str).unwrap_or("marketchat")
            )));
        }

        let mut config = EngineConfig {
            base_url: args[1].trim_end_matches('/').to_string(),
            current_user: args[2].clone(),
            ..Default::default()
        };

        let mut i = 3;
        while i < args.len() {
            match args[i].as_str() {
                "--token" => {
                    let t = args.get(i + 1).ok_or_else(|| {
                        ChatError::Config("--token requires a value".to_string())
                    })?;
                    config.bearer_token = Some(t.clone());
                    i += 2;
                }
                "--poll-ms" => {
                    let ms = parse_millis(args.get(i + 1), "--poll-ms")?;
                    config.poll_interval = ms;
                    config.request_timeout = ms;
                    i += 2;
                }
                "--jitter-ms" => {
                    config.poll_jitter = Some(parse_millis(args.get(i + 1), "--jitter-ms")?);
                    i += 2;
                }
                other => {
                    return Err(ChatError::Config(format!("Unknown flag: {}", other)));
                }
            }
        }

        // Env override (nice for scripts)
        if let Ok(token) = std::env::var("MARKETCHAT_TOKEN") {
            config.bearer_token = Some(token);
        }

        if config.current_user.trim().is_empty() {
            return Err(ChatError::Config("user_id must not be empty".to_string()));
        }

        Ok(config)
    }
}

fn parse_millis(arg: Option<&String>, flag: &str) -> Result<Duration> {
    let raw = arg.ok_or_else(|| ChatError::Config(format!("{} requires a value", flag)))?;
    let ms = raw
        .parse::<u64>()
        .map_err(|_| ChatError::Config(format!("{} must be a number of milliseconds", flag)))?;
    if ms == 0 {
        return Err(ChatError::Config(format!("{} must be positive", flag)));
    }
    Ok(Duration::from_millis(ms))
}
