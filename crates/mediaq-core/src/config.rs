use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External fetch engine settings (optional `[engine]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program invoked for downloads and metadata lookups.
    pub program: PathBuf,
    /// Passed as `--socket-timeout`.
    pub socket_timeout_secs: u64,
    /// Passed as `--retries`.
    pub retries: u32,
    /// Passed as `--fragment-retries`.
    pub fragment_retries: u32,
    /// Optional proxy URL passed as `--proxy`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Stderr lines containing this marker are engine-internal retries, not errors.
    pub retry_marker: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            socket_timeout_secs: 30,
            retries: 10,
            fragment_retries: 10,
            proxy: None,
            retry_marker: "Retrying".to_string(),
        }
    }
}

/// External transcoder settings (optional `[transcoder]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscoderConfig {
    /// Program used for `convert_to` and `mediaq convert`; called as
    /// `<program> -nostdin -n -loglevel error -i <input> <output>`.
    pub program: PathBuf,
    /// Upper bound for one conversion.
    pub timeout_secs: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            timeout_secs: 60 * 60,
        }
    }
}

impl TranscoderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Global configuration loaded from `~/.config/mediaq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaqConfig {
    /// Maximum number of jobs in `starting`/`downloading` at once.
    pub max_concurrent_downloads: usize,
    /// Default save directory for the CLI (None = current directory).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_root: Option<PathBuf>,
    /// How long pause/cancel wait for the engine to exit before killing it.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
    /// Upper bound for a metadata lookup.
    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    /// How long cached metadata stays valid.
    #[serde(default = "default_metadata_cache_ttl_secs")]
    pub metadata_cache_ttl_secs: u64,
    /// Length of a preview clip.
    #[serde(default = "default_preview_seconds")]
    pub preview_seconds: u32,
    /// Upper bound for fetching a preview clip.
    #[serde(default = "default_preview_timeout_secs")]
    pub preview_timeout_secs: u64,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

fn default_stop_grace_ms() -> u64 {
    5_000
}

fn default_metadata_timeout_secs() -> u64 {
    30
}

fn default_metadata_cache_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_preview_seconds() -> u32 {
    10
}

fn default_preview_timeout_secs() -> u64 {
    120
}

impl Default for MediaqConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 4,
            download_root: None,
            stop_grace_ms: default_stop_grace_ms(),
            metadata_timeout_secs: default_metadata_timeout_secs(),
            metadata_cache_ttl_secs: default_metadata_cache_ttl_secs(),
            preview_seconds: default_preview_seconds(),
            preview_timeout_secs: default_preview_timeout_secs(),
            engine: EngineConfig::default(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl MediaqConfig {
    /// Concurrency ceiling, never below one.
    pub fn ceiling(&self) -> usize {
        self.max_concurrent_downloads.max(1)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }

    pub fn preview_timeout(&self) -> Duration {
        Duration::from_secs(self.preview_timeout_secs)
    }
}

/// State directory shared by the log file, job database, and control socket:
/// `~/.local/state/mediaq` on Debian.
pub fn state_dir() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mediaq")?;
    Ok(xdg_dirs.get_state_home())
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mediaq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MediaqConfig> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] but for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<MediaqConfig> {
    if !path.exists() {
        let default_cfg = MediaqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path)?;
    let cfg: MediaqConfig = toml::from_str(&data)?;
    Ok(cfg)
}
