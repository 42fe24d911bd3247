//! Environment-derived configuration.
//!
//! Everything is read once at startup into explicit structs and handed to
//! the poll loop and the liveness server; nothing reads the environment
//! after that. A missing *enabling* variable disables its channel (logged
//! once at startup); a missing secret is kept as an empty value, so the
//! affected operation fails at first use instead — a known sharp edge.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Parse an env var, falling back to `default` when unset or unparseable.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ── Mailbox ─────────────────────────────────────────────────────────

/// Mailbox configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl MailConfig {
    /// Returns `None` if `EMAIL_IMAP_HOST` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let imap_host = std::env::var("EMAIL_IMAP_HOST").ok()?;

        let smtp_host =
            std::env::var("EMAIL_SMTP_HOST").unwrap_or_else(|_| imap_host.replace("imap", "smtp"));

        let username = std::env::var("EMAIL_USERNAME").unwrap_or_default();
        let password = SecretString::from(std::env::var("EMAIL_PASSWORD").unwrap_or_default());
        let from_address = std::env::var("EMAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Some(Self {
            imap_host,
            imap_port: env_parse("EMAIL_IMAP_PORT", 993),
            smtp_host,
            smtp_port: env_parse("EMAIL_SMTP_PORT", 465),
            username,
            password,
            from_address,
        })
    }
}

// ── Chat ────────────────────────────────────────────────────────────

/// Chat-bot configuration.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub bot_token: SecretString,
    /// Conversation that receives the startup announcement, if any.
    pub notify_conversation: Option<String>,
}

impl ChatConfig {
    /// Returns `None` if `CHAT_BOT_TOKEN` is not set (channel disabled).
    pub fn from_env() -> Option<Self> {
        let bot_token = SecretString::from(std::env::var("CHAT_BOT_TOKEN").ok()?);
        Some(Self {
            bot_token,
            notify_conversation: std::env::var("CHAT_NOTIFY_CONVERSATION").ok(),
        })
    }
}

// ── Generator ───────────────────────────────────────────────────────

/// Which completion backend is active for this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hosted API reached with a bearer key.
    Hosted,
    /// Loopback engine serving the downloaded weights file.
    Local,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Hosted => "hosted",
            Self::Local => "local",
        }
    }
}

/// Reply-generator configuration. Exactly one backend per deployment.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    pub backend: BackendKind,
    /// Full chat-completions endpoint URL.
    pub api_url: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
    /// Where to fetch the weights file from (local backend only).
    pub weights_url: Option<String>,
    pub weights_path: PathBuf,
}

impl GeneratorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("GENERATOR_BACKEND").as_deref() {
            Ok("hosted") => BackendKind::Hosted,
            Ok("local") | Err(_) => BackendKind::Local,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "GENERATOR_BACKEND".into(),
                    message: format!("unknown backend {other:?} (expected \"hosted\" or \"local\")"),
                });
            }
        };

        let api_url = match backend {
            BackendKind::Hosted => std::env::var("GENERATOR_API_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".into()),
            BackendKind::Local => std::env::var("LOCAL_ENGINE_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:11434/v1/chat/completions".into()),
        };

        let model = std::env::var("GENERATOR_MODEL").unwrap_or_else(|_| {
            match backend {
                BackendKind::Hosted => "gpt-4o-mini",
                BackendKind::Local => "llama3",
            }
            .into()
        });

        Ok(Self {
            backend,
            api_url,
            api_key: std::env::var("GENERATOR_API_KEY").ok().map(SecretString::from),
            model,
            timeout: Duration::from_secs(env_parse("GENERATOR_TIMEOUT_SECS", 60)),
            weights_url: std::env::var("MODEL_URL").ok(),
            weights_path: PathBuf::from(
                std::env::var("MODEL_PATH").unwrap_or_else(|_| "model.gguf".into()),
            ),
        })
    }
}

// ── Process ─────────────────────────────────────────────────────────

/// Top-level configuration, constructed once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mail: Option<MailConfig>,
    pub chat: Option<ChatConfig>,
    /// Base duty-cycle interval; halved for a cycle that found mail.
    pub base_interval: Duration,
    /// Liveness endpoint port.
    pub port: u16,
    pub log_dir: PathBuf,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            mail: MailConfig::from_env(),
            chat: ChatConfig::from_env(),
            base_interval: Duration::from_secs(env_parse("POLL_BASE_INTERVAL_SECS", 30)),
            port: env_parse("PORT", 10000),
            log_dir: PathBuf::from(std::env::var("LOG_DIR").unwrap_or_else(|_| "logs".into())),
        }
    }
}
