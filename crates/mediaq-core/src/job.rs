//! Job model shared by the scheduler, executor, and job database.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque job identifier, assigned at submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        JobId(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(JobId)
    }
}

/// Checks that `source` is an absolute http(s) URL.
pub fn validate_source(source: &str) -> Result<url::Url, String> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return Err("source URL is empty".to_string());
    }
    let parsed = url::Url::parse(trimmed).map_err(|e| format!("malformed source URL {trimmed:?}: {e}"))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        "http" | "https" => Err(format!("source URL has no host: {trimmed}")),
        other => Err(format!("unsupported URL scheme {other:?}: {trimmed}")),
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Starting,
    Downloading,
    Paused,
    Completed,
    Error,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Starting => "starting",
            JobStatus::Downloading => "downloading",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Error => "error",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parses a stored status string. Unknown values read back as `Error`.
    pub fn from_str(s: &str) -> Self {
        match s {
            "queued" => JobStatus::Queued,
            "starting" => JobStatus::Starting,
            "downloading" => JobStatus::Downloading,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Error,
        }
    }

    /// `starting` or `downloading`: an executor is bound and a slot is held.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Downloading)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Error | JobStatus::Cancelled
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One requested fetch, as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source: String,
    pub format: String,
    pub priority: i32,
    pub save_path: PathBuf,
    /// Re-encode the finished download into this format.
    pub convert_to: Option<String>,
    pub status: JobStatus,
    /// Percent complete in [0, 100].
    pub progress: f64,
    pub filename: Option<String>,
    pub media_type: Option<String>,
    /// Engine-specific resume checkpoint; opaque to the queue.
    pub last_chunk: Option<i64>,
    pub message: Option<String>,
    /// Where the finished artifact was placed.
    pub output_path: Option<PathBuf>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Job {
    /// A freshly submitted job in `queued`.
    pub fn new(
        source: impl Into<String>,
        format: impl Into<String>,
        priority: i32,
        save_path: impl Into<PathBuf>,
        now: i64,
    ) -> Self {
        Self {
            id: JobId::new(),
            source: source.into(),
            format: format.into(),
            priority,
            save_path: save_path.into(),
            convert_to: None,
            status: JobStatus::Queued,
            progress: 0.0,
            filename: None,
            media_type: None,
            last_chunk: None,
            message: None,
            output_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies a progress value; lower values than the current one are ignored.
    /// Returns whether the value was applied.
    pub fn apply_progress(&mut self, percent: f64) -> bool {
        if !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent < self.progress {
            return false;
        }
        self.progress = percent;
        true
    }
}
