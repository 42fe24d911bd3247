//! Error types for the auto-reply worker.
//!
//! Each subsystem gets its own enum so call sites can tell connectivity
//! failures from parse failures from generation failures. None of these
//! are allowed to crash the process: the poll loop is the highest layer
//! they reach, and it turns them into log lines plus an empty batch or a
//! fallback reply.

/// Mailbox failures — the IMAP fetch side and the SMTP submit side.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("IMAP connection to {host} failed: {reason}")]
    Connect { host: String, reason: String },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("IMAP authentication failed for {user}")]
    Auth { user: String },

    #[error("IMAP protocol error: {0}")]
    Protocol(String),

    #[error("malformed message {uid}: {reason}")]
    Parse { uid: u32, reason: String },

    #[error("SMTP send to {to} failed: {reason}")]
    Send { to: String, reason: String },
}

/// Chat endpoint failures.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat endpoint request failed: {0}")]
    Transport(String),

    #[error("chat endpoint returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("sendMessage to conversation {conversation} failed: {reason}")]
    Send { conversation: String, reason: String },
}

/// Reply-generation failures. Callers of the generator never see these;
/// they are logged and replaced by the fallback reply.
#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("generator is disabled for this process")]
    Disabled,

    #[error("backend {backend} request failed: {reason}")]
    Request { backend: String, reason: String },

    #[error("backend {backend} returned an unusable response: {reason}")]
    InvalidResponse { backend: String, reason: String },

    #[error("weights retrieval failed: {0}")]
    Weights(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors surfaced at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
