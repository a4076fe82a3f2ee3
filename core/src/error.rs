/// Error types for the conversation engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Malformed response: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session is closed")]
    Closed,
}

impl From<reqwest::Error> for ChatError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ChatError::Timeout(e.to_string())
        } else if e.is_decode() {
            ChatError::Transport(format!("body decode: {}", e))
        } else {
            ChatError::Transport(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
