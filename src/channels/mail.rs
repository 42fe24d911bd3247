//! Mailbox client — raw IMAP over rustls for the unseen fetch, lettre SMTP
//! for outbound replies.
//!
//! The fetch relies on the server's own read-state: SEARCH UNSEEN selects
//! the batch and each fetched message is flagged `\Seen`, so a message is
//! handed out at most once even when the reply later fails. Both protocol
//! sides are blocking and run under `spawn_blocking`.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use mail_parser::MessageParser;
use secrecy::ExposeSecret;
use tracing::{info, warn};

use crate::channels::{InboundMessage, Source};
use crate::config::MailConfig;
use crate::error::MailError;

/// Read timeout on the IMAP socket; a stalled server fails the cycle.
const IMAP_READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Bound on each SMTP submission.
const SMTP_TIMEOUT: Duration = Duration::from_secs(30);

// ── Seam ────────────────────────────────────────────────────────────

/// Inbound fetch + outbound reply seam, faked in tests.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch unseen messages, oldest first by server-assigned id. Fetched
    /// messages are flagged `\Seen` server-side as part of the call.
    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, MailError>;

    /// One submission attempt over a fresh connection. Not retried.
    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// IMAP + SMTP implementation of [`Mailbox`].
pub struct MailClient {
    config: MailConfig,
}

impl MailClient {
    pub fn new(config: MailConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Mailbox for MailClient {
    async fn fetch_unread(&self) -> Result<Vec<InboundMessage>, MailError> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| MailError::Protocol(format!("fetch task panicked: {e}")))?
    }

    async fn send_reply(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        let config = self.config.clone();
        let to = to.to_string();
        let subject = subject.to_string();
        let body = body.to_string();
        let to_for_err = to.clone();
        tokio::task::spawn_blocking(move || submit(&config, &to, &subject, &body))
            .await
            .map_err(|e| MailError::Send {
                to: to_for_err,
                reason: format!("send task panicked: {e}"),
            })?
    }
}

// ── IMAP session ────────────────────────────────────────────────────

/// One tagged-command IMAP session over rustls.
struct ImapSession {
    stream: rustls::StreamOwned<rustls::ClientConnection, TcpStream>,
    tag_seq: u32,
}

impl ImapSession {
    fn connect(config: &MailConfig) -> Result<Self, MailError> {
        let connect_err = |reason: String| MailError::Connect {
            host: config.imap_host.clone(),
            reason,
        };

        let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port))
            .map_err(|e| connect_err(e.to_string()))?;
        tcp.set_read_timeout(Some(IMAP_READ_TIMEOUT))
            .map_err(|e| connect_err(e.to_string()))?;

        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.imap_host.clone())
                .map_err(|e| MailError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailError::Tls(e.to_string()))?;

        let mut session = Self {
            stream: rustls::StreamOwned::new(conn, tcp),
            tag_seq: 0,
        };
        session.read_line()?; // server greeting
        Ok(session)
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match self.stream.read(&mut byte) {
                Ok(0) => return Err(MailError::Protocol("connection closed mid-response".into())),
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                }
                Err(e) => return Err(MailError::Protocol(e.to_string())),
            }
        }
    }

    /// Send one command and collect every line up to its tagged completion.
    fn command(&mut self, cmd: &str) -> Result<Vec<String>, MailError> {
        self.tag_seq += 1;
        let tag = format!("R{}", self.tag_seq);
        self.stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())
            .and_then(|()| self.stream.flush())
            .map_err(|e| MailError::Protocol(e.to_string()))?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                return Ok(lines);
            }
        }
    }

    /// Like [`Self::command`], but errors unless the completion is `OK`.
    fn expect_ok(&mut self, cmd: &str, what: &str) -> Result<Vec<String>, MailError> {
        let lines = self.command(cmd)?;
        if is_tagged_ok(lines.last()) {
            Ok(lines)
        } else {
            Err(MailError::Protocol(format!(
                "{what} rejected: {}",
                lines.last().map(String::as_str).unwrap_or("").trim_end()
            )))
        }
    }
}

/// True when a tagged completion line reports `OK`.
fn is_tagged_ok(line: Option<&String>) -> bool {
    line.is_some_and(|l| l.split_whitespace().nth(1) == Some("OK"))
}

// ── Fetch ───────────────────────────────────────────────────────────

/// Blocking unseen fetch: LOGIN → SELECT → SEARCH UNSEEN → FETCH each id
/// → STORE `\Seen` → LOGOUT.
fn fetch_unseen(config: &MailConfig) -> Result<Vec<InboundMessage>, MailError> {
    let mut session = ImapSession::connect(config)?;

    let login = session.command(&format!(
        "LOGIN \"{}\" \"{}\"",
        config.username,
        config.password.expose_secret()
    ))?;
    if !is_tagged_ok(login.last()) {
        return Err(MailError::Auth {
            user: config.username.clone(),
        });
    }

    session.expect_ok("SELECT \"INBOX\"", "SELECT")?;

    let search = session.expect_ok("SEARCH UNSEEN", "SEARCH")?;
    let ids = parse_search_ids(&search);

    let mut messages = Vec::new();
    for (n, id) in ids.iter().enumerate() {
        let fetch = session.command(&format!("FETCH {id} RFC822"))?;

        // Drop the untagged FETCH envelope line and the closing lines;
        // everything between is the literal, CRLF endings intact.
        let raw: String = fetch
            .iter()
            .skip(1)
            .take(fetch.len().saturating_sub(2))
            .cloned()
            .collect();

        match parse_inbound(raw.as_bytes(), *id, n + 1) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!(error = %e, "skipping malformed message"),
        }

        // The unseen filter is the only read-state; flag regardless of
        // whether the message parsed.
        let _ = session.command(&format!("STORE {id} +FLAGS (\\Seen)"));
    }

    let _ = session.command("LOGOUT");
    Ok(messages)
}

/// Pull message sequence ids out of `* SEARCH` lines, ascending.
fn parse_search_ids(lines: &[String]) -> Vec<u32> {
    let mut ids: Vec<u32> = lines
        .iter()
        .filter(|l| l.starts_with("* SEARCH"))
        .flat_map(|l| l.split_whitespace().skip(2))
        .filter_map(|tok| tok.parse().ok())
        .collect();
    ids.sort_unstable();
    ids
}

/// Parse a raw RFC822 message into an [`InboundMessage`].
///
/// The plain-text part is preferred; a message without one gets an empty
/// body. A missing subject becomes a positional placeholder.
fn parse_inbound(raw: &[u8], uid: u32, position: usize) -> Result<InboundMessage, MailError> {
    let parsed = MessageParser::default().parse(raw).ok_or(MailError::Parse {
        uid,
        reason: "not parseable as RFC822".into(),
    })?;

    let sender = parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .ok_or(MailError::Parse {
            uid,
            reason: "no sender address".into(),
        })?
        .to_string();

    let subject = parsed
        .subject()
        .map(str::to_string)
        .unwrap_or_else(|| format!("auto-reply message {position}"));

    let body = parsed
        .body_text(0)
        .map(|t| t.into_owned())
        .unwrap_or_default();

    Ok(InboundMessage::new(Source::Mail, sender, body, position).with_subject(subject))
}

// ── Submit ──────────────────────────────────────────────────────────

/// One SMTP submission over a fresh authenticated connection.
fn submit(config: &MailConfig, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
    let send_err = |reason: String| MailError::Send {
        to: to.to_string(),
        reason,
    };

    let creds = Credentials::new(
        config.username.clone(),
        config.password.expose_secret().to_string(),
    );
    let transport = SmtpTransport::relay(&config.smtp_host)
        .map_err(|e| send_err(format!("relay setup: {e}")))?
        .port(config.smtp_port)
        .credentials(creds)
        .timeout(Some(SMTP_TIMEOUT))
        .build();

    let email = Message::builder()
        .from(
            config
                .from_address
                .parse()
                .map_err(|e| send_err(format!("invalid from address: {e}")))?,
        )
        .to(to
            .parse()
            .map_err(|e| send_err(format!("invalid to address: {e}")))?)
        .subject(subject)
        .body(body.to_string())
        .map_err(|e| send_err(format!("message build: {e}")))?;

    transport.send(&email).map_err(|e| send_err(e.to_string()))?;

    info!(to, subject, "reply mail sent");
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
