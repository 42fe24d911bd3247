//! Model-weights retrieval for the local backend.
//!
//! The file is fetched once and kept next to the process; an existing
//! file short-circuits the whole step. Downloads stream into a `.part`
//! sibling and are renamed into place on completion, so a crash never
//! leaves a truncated file under the final name. A leftover `.part`
//! triggers a best-effort `Range` resume; servers that answer 200 instead
//! of 206 restart the transfer from scratch.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::RANGE;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::error::GeneratorError;

/// Sibling path the in-flight transfer writes to.
fn part_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(".part");
    PathBuf::from(os)
}

/// Make sure the weights file exists at `dest`, downloading it from `url`
/// if it does not.
pub async fn ensure_weights(url: &str, dest: &Path) -> Result<(), GeneratorError> {
    if fs::try_exists(dest).await? {
        info!(path = %dest.display(), "weights file present, skipping download");
        return Ok(());
    }

    if let Some(parent) = dest.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).await?;
    }

    let part = part_path(dest);
    let resume_from = match fs::metadata(&part).await {
        Ok(meta) if meta.len() > 0 => meta.len(),
        _ => 0,
    };

    // No overall timeout: weights files are large and transfer time is
    // unbounded. The connect phase is still bounded.
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(|e| GeneratorError::Weights(e.to_string()))?;

    let mut request = client.get(url);
    if resume_from > 0 {
        request = request.header(RANGE, format!("bytes={resume_from}-"));
    }
    let response = request
        .send()
        .await
        .map_err(|e| GeneratorError::Weights(e.to_string()))?;

    let status = response.status();
    let resumed = status == StatusCode::PARTIAL_CONTENT && resume_from > 0;
    let mut file = if resumed {
        fs::OpenOptions::new().append(true).open(&part).await?
    } else if status.is_success() {
        fs::File::create(&part).await?
    } else {
        return Err(GeneratorError::Weights(format!("{url} returned {status}")));
    };

    if resume_from > 0 {
        info!(resumed, offset = resume_from, "partial weights file found");
    }

    let mut written: u64 = if resumed { resume_from } else { 0 };
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| GeneratorError::Weights(e.to_string()))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    fs::rename(&part, dest).await?;
    info!(path = %dest.display(), bytes = written, "weights download complete");
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────
