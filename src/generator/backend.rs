//! OpenAI-compatible completion backend.
//!
//! One wire protocol covers both deployments: a hosted API reached with a
//! bearer key, or a loopback engine (Ollama, llama-server) serving the
//! downloaded weights. Wire types stay private to this module — callers
//! only see prompt in, reply text out.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::GeneratorError;

/// Text-completion seam: prompt in, reply text out.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError>;
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
}

// ── HTTP backend ────────────────────────────────────────────────────

/// Adapter for any endpoint implementing `/v1/chat/completions`.
pub struct HttpBackend {
    name: &'static str,
    client: reqwest::Client,
    api_url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl HttpBackend {
    pub fn new(
        name: &'static str,
        api_url: String,
        api_key: Option<SecretString>,
        model: String,
        timeout: Duration,
    ) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GeneratorError::Request {
                backend: name.into(),
                reason: format!("client construction: {e}"),
            })?;
        Ok(Self {
            name,
            client,
            api_url,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl CompletionBackend for HttpBackend {
    fn name(&self) -> &str {
        self.name
    }

    async fn complete(&self, prompt: &str) -> Result<String, GeneratorError> {
        let payload = ChatRequest {
            model: self.model.clone(),
            messages: vec![WireMessage {
                role: "user".into(),
                content: prompt.into(),
            }],
            temperature: 0.7,
        };

        debug!(backend = self.name, model = %self.model, prompt_len = prompt.len(), "completion request");

        let mut request = self.client.post(&self.api_url).json(&payload);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request.send().await.map_err(|e| GeneratorError::Request {
            backend: self.name.into(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::Request {
                backend: self.name.into(),
                reason: format!("{status}: {body}"),
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| GeneratorError::InvalidResponse {
                    backend: self.name.into(),
                    reason: e.to_string(),
                })?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default();
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(GeneratorError::InvalidResponse {
                backend: self.name.into(),
                reason: "empty completion".into(),
            });
        }
        Ok(text)
    }
}

// ── Tests ───────────────────────────────────────────────────────────
