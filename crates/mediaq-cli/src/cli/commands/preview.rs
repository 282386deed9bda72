//! `mediaq preview <url>` – fetch a short clip without queueing a job.

use anyhow::Result;
use mediaq_core::config::MediaqConfig;
use mediaq_core::preview;
use std::path::Path;

pub async fn run_preview(cfg: &MediaqConfig, root: &Path, url: &str, format: &str) -> Result<()> {
    println!("Fetching the first {} seconds of {url}...", cfg.preview_seconds);
    let path = preview::generate_preview(cfg, root, url, format).await?;
    println!("Preview saved to {}", path.display());
    Ok(())
}
