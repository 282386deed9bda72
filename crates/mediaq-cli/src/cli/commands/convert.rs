//! `mediaq convert <file> <format>` – re-encode a file already on disk.

use anyhow::Result;
use mediaq_core::config::MediaqConfig;
use mediaq_core::transcode;
use std::path::Path;

pub async fn run_convert(cfg: &MediaqConfig, input: &Path, format: &str) -> Result<()> {
    let output = transcode::convert_file(cfg, input, format).await?;
    println!("Converted {} -> {}", input.display(), output.display());
    Ok(())
}
