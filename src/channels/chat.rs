//! Chat client — pull-based Bot API polling and best-effort sends.
//!
//! Inbound is a `getUpdates` call carrying the caller's cursor as the
//! `offset` parameter; requesting with a positive offset discards older
//! updates server-side, which is the only acknowledgement the protocol
//! has. Outbound is a single `sendMessage` POST per reply.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::channels::{ChatUpdate, InboundMessage, Source};
use crate::error::ChatError;

/// Bound on each Bot API round-trip.
const CHAT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

// ── Seam ────────────────────────────────────────────────────────────

/// One `getUpdates` batch: the text-bearing messages in server order,
/// plus the highest update id seen — which also covers updates that were
/// skipped (no message, no text), so the whole batch can be acknowledged.
#[derive(Debug, Default)]
pub struct ChatBatch {
    pub updates: Vec<ChatUpdate>,
    pub last_update_id: Option<i64>,
}

/// Chat endpoint seam, faked in tests.
#[async_trait]
pub trait ChatEndpoint: Send + Sync {
    /// Fetch updates newer than `offset`. A positive offset acknowledges
    /// everything below it server-side.
    async fn fetch_new(&self, offset: i64) -> Result<ChatBatch, ChatError>;

    /// One `sendMessage` attempt. Not retried.
    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<(), ChatError>;
}

// ── Client ──────────────────────────────────────────────────────────

/// Bot API implementation of [`ChatEndpoint`].
pub struct ChatClient {
    bot_token: SecretString,
    base_url: String,
    client: reqwest::Client,
}

impl ChatClient {
    pub fn new(bot_token: SecretString) -> Result<Self, ChatError> {
        Self::with_base_url(bot_token, "https://api.telegram.org".into())
    }

    /// Point the client at a different API host (tests, self-hosted
    /// gateways).
    pub fn with_base_url(bot_token: SecretString, base_url: String) -> Result<Self, ChatError> {
        let client = reqwest::Client::builder()
            .timeout(CHAT_HTTP_TIMEOUT)
            .build()
            .map_err(|e| ChatError::Transport(format!("client construction: {e}")))?;
        Ok(Self {
            bot_token,
            base_url,
            client,
        })
    }

    fn api_url(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{method}",
            self.base_url,
            self.bot_token.expose_secret()
        )
    }
}

#[async_trait]
impl ChatEndpoint for ChatClient {
    async fn fetch_new(&self, offset: i64) -> Result<ChatBatch, ChatError> {
        let mut request = self.client.get(self.api_url("getUpdates"));
        if offset > 0 {
            request = request.query(&[("offset", offset)]);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ChatError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;

        if !data
            .get("ok")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Err(ChatError::Api {
                status: status.as_u16(),
                body: data.to_string(),
            });
        }

        Ok(parse_updates(&data))
    }

    async fn send_reply(&self, conversation_id: &str, text: &str) -> Result<(), ChatError> {
        let body = serde_json::json!({
            "chat_id": conversation_id,
            "text": text,
        });

        let response = self
            .client
            .post(self.api_url("sendMessage"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Send {
                conversation: conversation_id.into(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let reason = response.text().await.unwrap_or_default();
            return Err(ChatError::Send {
                conversation: conversation_id.into(),
                reason: format!("{status}: {reason}"),
            });
        }

        info!(conversation = conversation_id, "chat reply sent");
        Ok(())
    }
}

// ── Parsing ─────────────────────────────────────────────────────────

/// Extract text-bearing message updates from a `getUpdates` response, in
/// server order. Updates without a text message (stickers, edits, member
/// events) are skipped one by one but still counted toward
/// `last_update_id`, so a batch of nothing but skips is still fully
/// acknowledged.
pub fn parse_updates(data: &serde_json::Value) -> ChatBatch {
    let Some(results) = data.get("result").and_then(serde_json::Value::as_array) else {
        return ChatBatch::default();
    };

    let mut batch = ChatBatch::default();
    for entry in results {
        let Some(update_id) = entry.get("update_id").and_then(serde_json::Value::as_i64) else {
            continue;
        };
        batch.last_update_id = Some(batch.last_update_id.map_or(update_id, |m| m.max(update_id)));

        let Some(message) = entry.get("message") else {
            continue;
        };
        let Some(text) = message.get("text").and_then(serde_json::Value::as_str) else {
            continue;
        };
        let Some(conversation) = message
            .get("chat")
            .and_then(|c| c.get("id"))
            .and_then(serde_json::Value::as_i64)
        else {
            continue;
        };

        let position = batch.updates.len() + 1;
        batch.updates.push(ChatUpdate {
            update_id,
            message: InboundMessage::new(Source::Chat, conversation.to_string(), text, position),
        });
    }
    batch
}

// ── Tests ───────────────────────────────────────────────────────────
