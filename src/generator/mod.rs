//! Reply generation with a fixed fallback.
//!
//! The generator never fails toward its caller: any backend problem is
//! logged, counted, and replaced by [`FALLBACK_REPLY`], so every inbound
//! message gets *some* reply. No retry happens here — callers treat the
//! returned text as final.

pub mod backend;
pub mod weights;

pub use backend::{CompletionBackend, HttpBackend};
pub use weights::ensure_weights;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{error, warn};

use crate::config::{BackendKind, GeneratorConfig};
use crate::error::GeneratorError;

/// Sent whenever the backend cannot produce a reply.
pub const FALLBACK_REPLY: &str =
    "Sorry, an automated reply could not be generated right now. Your message has been received.";

/// Outcome of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplyResult {
    pub text: String,
    /// False when `text` is the fallback.
    pub generated: bool,
}

/// Wraps the completion backend behind a never-fails surface.
pub struct ReplyGenerator {
    backend: Option<Arc<dyn CompletionBackend>>,
    failures: AtomicU64,
}

impl ReplyGenerator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend: Some(backend),
            failures: AtomicU64::new(0),
        }
    }

    /// A generator with no backend; every call yields the fallback. Used
    /// when startup fails — the process keeps running without generation.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            failures: AtomicU64::new(0),
        }
    }

    /// Build from config. For the local backend the weights file is
    /// ensured on disk first. Any failure here disables generation for
    /// the process lifetime instead of aborting startup.
    pub async fn initialize(config: &GeneratorConfig) -> Self {
        match Self::try_initialize(config).await {
            Ok(generator) => generator,
            Err(e) => {
                error!(error = %e, "generator startup failed; replies fall back for the process lifetime");
                Self::disabled()
            }
        }
    }

    async fn try_initialize(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        if config.backend == BackendKind::Local {
            let url = config
                .weights_url
                .as_deref()
                .ok_or_else(|| GeneratorError::Weights("MODEL_URL is not set".into()))?;
            weights::ensure_weights(url, &config.weights_path).await?;
        }

        let backend = HttpBackend::new(
            config.backend.label(),
            config.api_url.clone(),
            config.api_key.clone(),
            config.model.clone(),
            config.timeout,
        )?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Generate a reply for `text`. Never returns an error: backend
    /// failures are logged, counted, and replaced by [`FALLBACK_REPLY`].
    pub async fn generate(&self, text: &str) -> ReplyResult {
        let outcome = match &self.backend {
            Some(backend) => backend.complete(&build_prompt(text)).await,
            None => Err(GeneratorError::Disabled),
        };

        match outcome {
            Ok(reply) => ReplyResult {
                text: reply,
                generated: true,
            },
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "generation failed, using fallback");
                ReplyResult {
                    text: FALLBACK_REPLY.into(),
                    generated: false,
                }
            }
        }
    }

    /// Calls that fell back since startup.
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// Frame the inbound text as a brief, polite reply request.
fn build_prompt(text: &str) -> String {
    format!(
        "Write a brief, polite reply to the following message. \
         Respond with the reply text only.\n\n{text}"
    )
}

// ── Tests ───────────────────────────────────────────────────────────
