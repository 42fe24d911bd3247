use std::sync::Arc;

use replybot::channels::{ChatClient, ChatEndpoint, MailClient, Mailbox};
use replybot::config::{Config, GeneratorConfig};
use replybot::generator::ReplyGenerator;
use replybot::poll::{PollLoop, spawn_poll_loop};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = Config::from_env();
    let _log_guard = replybot::logging::init(&config.log_dir);

    eprintln!("📬 replybot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Liveness: http://0.0.0.0:{}/", config.port);
    eprintln!("   Logs: {}", config.log_dir.display());

    // ── Generator ───────────────────────────────────────────────────
    let generator = Arc::new(match GeneratorConfig::from_env() {
        Ok(generator_config) => {
            eprintln!("   Generator: {}", generator_config.backend.label());
            ReplyGenerator::initialize(&generator_config).await
        }
        Err(e) => {
            tracing::error!(error = %e, "generator misconfigured; replies will use the fallback");
            ReplyGenerator::disabled()
        }
    });

    // ── Channels ────────────────────────────────────────────────────
    let mailbox: Option<Arc<dyn Mailbox>> = match &config.mail {
        Some(mail_config) => {
            eprintln!(
                "   Mail: enabled (IMAP: {}, SMTP: {})",
                mail_config.imap_host, mail_config.smtp_host
            );
            Some(Arc::new(MailClient::new(mail_config.clone())))
        }
        None => {
            eprintln!("   Mail: disabled (EMAIL_IMAP_HOST not set)");
            None
        }
    };

    let chat: Option<Arc<dyn ChatEndpoint>> = match &config.chat {
        Some(chat_config) => {
            eprintln!("   Chat: enabled");
            match ChatClient::new(chat_config.bot_token.clone()) {
                Ok(client) => Some(Arc::new(client)),
                Err(e) => {
                    tracing::error!(error = %e, "chat client construction failed");
                    None
                }
            }
        }
        None => {
            eprintln!("   Chat: disabled (CHAT_BOT_TOKEN not set)");
            None
        }
    };

    // Best-effort startup announcement to the configured conversation.
    if let (Some(chat), Some(chat_config)) = (&chat, &config.chat)
        && let Some(conversation) = &chat_config.notify_conversation
    {
        if let Err(e) = chat.send_reply(conversation, "auto-reply worker started").await {
            tracing::warn!(error = %e, "startup announcement failed");
        }
    }

    // ── Run ─────────────────────────────────────────────────────────
    let poll = PollLoop::new(mailbox, chat, generator, config.base_interval);
    let (_poll_handle, _shutdown) = spawn_poll_loop(poll);

    replybot::server::serve(config.port).await?;
    Ok(())
}
