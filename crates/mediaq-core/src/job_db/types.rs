//! Types used by the job database.

use std::path::PathBuf;

use crate::job::{Job, JobId, JobStatus};

/// Durable mirror of a job, one row in `jobs`.
///
/// Upserted on every observable state change and never deleted automatically,
/// so the table doubles as download history.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub source: String,
    pub format: String,
    pub priority: i32,
    pub save_path: PathBuf,
    pub convert_to: Option<String>,
    pub status: JobStatus,
    pub progress: f64,
    pub filename: Option<String>,
    pub media_type: Option<String>,
    pub last_chunk: Option<i64>,
    pub message: Option<String>,
    pub output_path: Option<PathBuf>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl From<&Job> for JobRecord {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            source: job.source.clone(),
            format: job.format.clone(),
            priority: job.priority,
            save_path: job.save_path.clone(),
            convert_to: job.convert_to.clone(),
            status: job.status,
            progress: job.progress,
            filename: job.filename.clone(),
            media_type: job.media_type.clone(),
            last_chunk: job.last_chunk,
            message: job.message.clone(),
            output_path: job.output_path.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

impl From<JobRecord> for Job {
    fn from(r: JobRecord) -> Self {
        Self {
            id: r.id,
            source: r.source,
            format: r.format,
            priority: r.priority,
            save_path: r.save_path,
            convert_to: r.convert_to,
            status: r.status,
            progress: r.progress,
            filename: r.filename,
            media_type: r.media_type,
            last_chunk: r.last_chunk,
            message: r.message,
            output_path: r.output_path,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}
