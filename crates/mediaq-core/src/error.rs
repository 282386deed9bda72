//! Typed failures returned across the core's public surface.

use std::time::Duration;
use thiserror::Error;

use crate::job::{JobId, JobStatus};

/// Failure of a scheduler call. Job lifecycle failures are not reported here;
/// they are recorded on the job and read back through `get_status`.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("cannot {action} job {id} while it is {from}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        action: &'static str,
    },

    #[error("job database unavailable: {0:#}")]
    Store(anyhow::Error),
}

/// Failure to start or supervise the external engine.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to launch engine {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot create save directory {path}: {source}")]
    SaveDir {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("engine stdout/stderr pipe missing")]
    MissingPipe,
}

/// Failure of a metadata lookup. No job is created for these.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("metadata fetch timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to launch engine {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("engine failed (code={code:?}): {message}")]
    Engine { code: Option<i32>, message: String },

    #[error("could not parse engine metadata: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a one-off conversion or preview run.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("{tool} timed out after {}s", .limit.as_secs())]
    Timeout { tool: &'static str, limit: Duration },

    #[error("failed to launch {program}: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} failed (code={code:?}): {message}")]
    Failed {
        tool: &'static str,
        code: Option<i32>,
        message: String,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
