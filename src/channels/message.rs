//! Inbound message types shared by both channels.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Which channel a message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Mail,
    Chat,
}

/// A message fetched during one poll cycle.
///
/// Immutable once built, and never persisted — it lives exactly as long
/// as the cycle that fetched it.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Process-local id used to correlate log lines.
    pub id: Uuid,
    pub source: Source,
    /// Email address (mail) or conversation id (chat).
    pub sender: String,
    /// Mail only; a positional placeholder is synthesized when the header
    /// is absent.
    pub subject: Option<String>,
    pub body: String,
    /// 1-based receipt-order position within the fetched batch.
    pub position: usize,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(
        source: Source,
        sender: impl Into<String>,
        body: impl Into<String>,
        position: usize,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            source,
            sender: sender.into(),
            subject: None,
            body: body.into(),
            position,
            received_at: Utc::now(),
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

/// A chat update paired with its server-assigned update id.
#[derive(Debug, Clone)]
pub struct ChatUpdate {
    pub update_id: i64,
    pub message: InboundMessage,
}
