//! Descriptive metadata for a source, read with `<engine> -J`.
//!
//! Lookups are bounded by `metadata_timeout_secs`; on timeout the engine is
//! killed. Results are cached in the job database for
//! `metadata_cache_ttl_secs`. Nothing here touches the job queue.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

use crate::config::MediaqConfig;
use crate::error::MetadataError;
use crate::job::validate_source;
use crate::job_db::JobDb;

/// One downloadable format as listed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    pub id: String,
    pub ext: String,
    pub resolution: String,
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub thumbnail: Option<String>,
    /// Human-readable duration (`4:13`, `1:02:03`).
    pub duration: Option<String>,
    pub view_count: Option<u64>,
    /// `YYYYMMDD`, as the engine reports it.
    pub upload_date: Option<String>,
    pub channel: Option<String>,
    #[serde(default)]
    pub formats: Vec<FormatInfo>,
}

#[derive(Deserialize)]
struct RawInfo {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    duration_string: Option<String>,
    #[serde(default)]
    view_count: Option<u64>,
    #[serde(default)]
    upload_date: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    resolution: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    format_note: Option<String>,
}

fn format_duration(secs: f64) -> Option<String> {
    if !secs.is_finite() || secs < 0.0 {
        return None;
    }
    let total = secs.round() as u64;
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    Some(if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    })
}

impl From<RawFormat> for FormatInfo {
    fn from(raw: RawFormat) -> Self {
        let audio_only = raw.vcodec.as_deref() == Some("none");
        let resolution = if audio_only {
            "audio only".to_string()
        } else {
            raw.resolution.unwrap_or_default()
        };
        FormatInfo {
            id: raw.format_id,
            ext: raw.ext.unwrap_or_default(),
            resolution,
            note: raw.format_note.unwrap_or_default().trim().to_string(),
        }
    }
}

/// Parses the engine's `-J` output. Storyboard and `mhtml` entries are dropped.
pub fn parse_info_json(json: &str) -> Result<MediaMetadata, MetadataError> {
    let raw: RawInfo = serde_json::from_str(json)?;
    let formats = raw
        .formats
        .into_iter()
        .filter(|f| !f.format_id.contains("storyboard") && f.ext.as_deref() != Some("mhtml"))
        .map(FormatInfo::from)
        .collect();

    Ok(MediaMetadata {
        title: raw.title.unwrap_or_default(),
        thumbnail: raw.thumbnail,
        duration: raw.duration_string.or_else(|| raw.duration.and_then(format_duration)),
        view_count: raw.view_count,
        upload_date: raw.upload_date,
        channel: raw.uploader.or(raw.channel),
        formats,
    })
}

async fn query_engine(cfg: &MediaqConfig, source: &str) -> Result<MediaMetadata, MetadataError> {
    let engine = &cfg.engine;
    let mut cmd = Command::new(&engine.program);
    cmd.arg("-J").arg("--no-playlist");
    cmd.arg("--socket-timeout")
        .arg(engine.socket_timeout_secs.to_string());
    if let Some(proxy) = &engine.proxy {
        cmd.arg("--proxy").arg(proxy);
    }
    cmd.arg("--")
        .arg(source)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(|source| MetadataError::Launch {
        program: engine.program.display().to_string(),
        source,
    })?;

    let limit = cfg.metadata_timeout();
    // Dropping the future on timeout drops the child, which kills it.
    let output = tokio::time::timeout(limit, child.wait_with_output())
        .await
        .map_err(|_| MetadataError::Timeout(limit))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = stderr
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("metadata lookup failed")
            .to_string();
        return Err(MetadataError::Engine {
            code: output.status.code(),
            message,
        });
    }

    parse_info_json(&String::from_utf8_lossy(&output.stdout))
}

/// Fetches metadata for `source`, consulting and filling the cache when a
/// database is given. Cache failures are logged and otherwise ignored.
pub async fn fetch_metadata(
    cfg: &MediaqConfig,
    db: Option<&JobDb>,
    source: &str,
) -> Result<MediaMetadata, MetadataError> {
    let url = validate_source(source).map_err(MetadataError::InvalidRequest)?;
    let key = url.as_str();

    if let Some(db) = db {
        match db.get_cached_metadata(key).await {
            Ok(Some(meta)) => {
                tracing::debug!(source = key, "metadata cache hit");
                return Ok(meta);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "metadata cache read failed"),
        }
    }

    let meta = query_engine(cfg, key).await?;
    tracing::info!(source = key, title = %meta.title, formats = meta.formats.len(), "metadata fetched");

    if let Some(db) = db {
        if let Err(e) = db
            .cache_metadata(key, &meta, cfg.metadata_cache_ttl_secs)
            .await
        {
            tracing::warn!(error = %e, "metadata cache write failed");
        }
    }
    Ok(meta)
}
