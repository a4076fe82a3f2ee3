/// Transport adapter: the request/response contract with the chat backend.
///
/// Endpoints:
///   GET  /conversations
///   POST /conversations/start              body: {"target_user_id":"...","linked_item_id":...}
///   GET  /conversations/{id}/messages
///   GET  /conversations/{id}/poll?since={millis}
///   POST /conversations/{id}/send          body: {"content":"...","type":"text|image"}
use crate::config::EngineConfig;
use crate::error::{ChatError, Result};
use crate::types::{Conversation, Message, MessageKind};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

/// The five wire operations the engine depends on. Stateless; kept behind a
/// trait so tests inject an in-memory fake.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<Conversation>>;

    /// Create-or-get a conversation with another user, optionally linked to
    /// a marketplace listing. Returns the conversation id.
    async fn start_conversation(
        &self,
        target_user_id: &str,
        linked_item_id: Option<&str>,
    ) -> Result<String>;

    /// Initial history page, ascending by `created_at`.
    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Messages with `created_at > since`, ascending; empty when none.
    async fn poll_since(&self, conversation_id: &str, since: i64) -> Result<Vec<Message>>;

    /// Send a message; returns the created message with its server id.
    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message>;
}

#[derive(Serialize)]
struct StartConversationRequest<'a> {
    target_user_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    linked_item_id: Option<&'a str>,
}

#[derive(Deserialize)]
struct StartConversationResponse {
    conversation_id: String,
}

#[derive(Serialize)]
struct SendRequest<'a> {
    content: &'a str,
    #[serde(rename = "type")]
    kind: MessageKind,
}

/// HTTP implementation over reqwest. One client instance is shared by the
/// list aggregator and every open session.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ChatError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.get(format!("{}{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.authorize(self.client.post(format!("{}{}", self.base_url, path)))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

/// Map a response status to the engine's error taxonomy before decoding.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    match resp.status() {
        s if s.is_success() => Ok(resp),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChatError::AuthRequired),
        s => Err(ChatError::Transport(format!("HTTP {}", s))),
    }
}

/// Decode a 2xx body. Unexpected payload shapes surface as `Malformed` so
/// callers can drop the batch without touching conversation state.
async fn decode_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let body = resp.text().await?;
    Ok(serde_json::from_str(&body)?)
}

#[async_trait]
impl Transport for HttpTransport {
    async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let resp = check_status(self.get("/conversations").send().await?).await?;
        decode_json(resp).await
    }

    async fn start_conversation(
        &self,
        target_user_id: &str,
        linked_item_id: Option<&str>,
    ) -> Result<String> {
        let body = StartConversationRequest {
            target_user_id,
            linked_item_id,
        };
        let resp = check_status(
            self.post("/conversations/start")
                .json(&body)
                .send()
                .await?,
        )
        .await?;
        let created: StartConversationResponse = decode_json(resp).await?;
        Ok(created.conversation_id)
    }

    async fn fetch_history(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let path = format!("/conversations/{}/messages", conversation_id);
        let resp = check_status(self.get(&path).send().await?).await?;
        decode_json(resp).await
    }

    async fn poll_since(&self, conversation_id: &str, since: i64) -> Result<Vec<Message>> {
        let path = format!("/conversations/{}/poll?since={}", conversation_id, since);
        let resp = check_status(self.get(&path).send().await?).await?;
        decode_json(resp).await
    }

    async fn send_message(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
    ) -> Result<Message> {
        let path = format!("/conversations/{}/send", conversation_id);
        let body = SendRequest { content, kind };
        let resp = check_status(self.post(&path).json(&body).send().await?).await?;
        decode_json(resp).await
    }
}
