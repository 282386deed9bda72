//! Job read operations: get and list.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;

use super::super::db::JobDb;
use super::super::types::JobRecord;
use crate::job::{JobId, JobStatus};

const SELECT_COLUMNS: &str = r#"
    SELECT id, source, format, priority, save_path, convert_to, status, progress,
           filename, media_type, last_chunk, message, output_path,
           created_at, updated_at
    FROM jobs
"#;

fn record_from_row(row: &SqliteRow) -> Result<JobRecord> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let save_path: String = row.get("save_path");
    let output_path: Option<String> = row.get("output_path");
    let priority: i64 = row.get("priority");

    Ok(JobRecord {
        id: id
            .parse::<JobId>()
            .with_context(|| format!("invalid job id in database: {id}"))?,
        source: row.get("source"),
        format: row.get("format"),
        priority: priority as i32,
        save_path: PathBuf::from(save_path),
        convert_to: row.get("convert_to"),
        status: JobStatus::from_str(&status),
        progress: row.get("progress"),
        filename: row.get("filename"),
        media_type: row.get("media_type"),
        last_chunk: row.get("last_chunk"),
        message: row.get("message"),
        output_path: output_path.map(PathBuf::from),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl JobDb {
    /// Fetch a single record.
    pub async fn get_record(&self, id: JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    /// List every record, newest first (download history).
    pub async fn list_records(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} ORDER BY created_at DESC, rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    /// Records that are not in a terminal state, oldest first (submission order).
    pub async fn list_unfinished(&self) -> Result<Vec<JobRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE status NOT IN ('completed', 'error', 'cancelled')
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
