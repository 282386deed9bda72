//! Re-encoding through the external transcoder.
//!
//! Used after a download when the job carries `convert_to`, and on its own by
//! `mediaq convert`. The converted file never replaces an existing one: its
//! name is numbered like any other collision. The input is left in place.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

use crate::allocator::FilenameAllocator;
use crate::config::{MediaqConfig, TranscoderConfig};
use crate::error::ToolError;

/// Normalizes a conversion target such as `MP3` or `.ogg` to a bare,
/// lowercase container name.
pub fn validate_target(format: &str) -> Result<String, String> {
    let target = format.trim().trim_start_matches('.').to_ascii_lowercase();
    if target.is_empty() {
        return Err("conversion format is empty".to_string());
    }
    if target.len() > 8 || !target.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(format!("unsupported conversion format {format:?}"));
    }
    Ok(target)
}

/// `talk.webm` → `talk.<target>`; a name without extension gets one appended.
pub fn converted_name(input_name: &str, target: &str) -> String {
    let stem = match input_name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => input_name,
    };
    format!("{stem}.{target}")
}

pub(crate) fn last_line(text: &str) -> Option<&str> {
    text.lines().rev().map(str::trim).find(|l| !l.is_empty())
}

/// Runs `cmd` to completion within `limit` and returns its stdout. The child
/// is killed if the limit runs out. A failed run reports its last stderr line.
pub(crate) async fn run_bounded(
    mut cmd: Command,
    tool: &'static str,
    limit: Duration,
) -> Result<Vec<u8>, ToolError> {
    let program = cmd.as_std().get_program().to_string_lossy().into_owned();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    let child = cmd
        .spawn()
        .map_err(|source| ToolError::Launch { program, source })?;

    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| ToolError::Timeout { tool, limit })??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ToolError::Failed {
            tool,
            code: output.status.code(),
            message: last_line(&stderr).unwrap_or("no error output").to_string(),
        });
    }
    Ok(output.stdout)
}

/// Transcodes `input` into `output`. The container is picked from the
/// output's extension. A partial output is removed on failure.
pub(crate) async fn transcode(
    cfg: &TranscoderConfig,
    input: &Path,
    output: &Path,
) -> Result<(), ToolError> {
    let mut cmd = Command::new(&cfg.program);
    cmd.args(["-nostdin", "-n", "-loglevel", "error", "-i"])
        .arg(input)
        .arg(output);
    tracing::debug!(input = %input.display(), output = %output.display(), "transcoding");

    if let Err(e) = run_bounded(cmd, "transcoder", cfg.timeout()).await {
        let _ = tokio::fs::remove_file(output).await;
        return Err(e);
    }
    Ok(())
}

/// Converts `input` to `format`, writing the result next to it. Returns the
/// path of the new file.
pub async fn convert_file(
    cfg: &MediaqConfig,
    input: &Path,
    format: &str,
) -> Result<PathBuf, ToolError> {
    let target = validate_target(format).map_err(ToolError::InvalidRequest)?;
    let is_file = tokio::fs::metadata(input)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false);
    if !is_file {
        return Err(ToolError::InvalidRequest(format!(
            "no such file: {}",
            input.display()
        )));
    }
    let Some(name) = input.file_name().and_then(|n| n.to_str()) else {
        return Err(ToolError::InvalidRequest(format!(
            "unusable file name: {}",
            input.display()
        )));
    };
    let current = input
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    if current.as_deref() == Some(target.as_str()) {
        return Err(ToolError::InvalidRequest(format!(
            "{} is already {target}",
            input.display()
        )));
    }

    let dir = input.parent().unwrap_or(Path::new(""));
    let output = dir.join(FilenameAllocator::new().allocate(dir, &converted_name(name, &target)));
    transcode(&cfg.transcoder, input, &output).await?;
    tracing::info!(input = %input.display(), output = %output.display(), "file converted");
    Ok(output)
}
