//! Job write operations: upsert and status update.

use anyhow::Result;

use super::super::db::{unix_timestamp, JobDb};
use super::super::types::JobRecord;
use crate::job::{JobId, JobStatus};

impl JobDb {
    /// Insert or replace the record for `record.id`.
    pub async fn upsert_record(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, source, format, priority, save_path, status, progress,
                filename, media_type, last_chunk, message, output_path,
                created_at, updated_at, convert_to
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
            ON CONFLICT(id) DO UPDATE SET
                source = excluded.source,
                format = excluded.format,
                priority = excluded.priority,
                save_path = excluded.save_path,
                status = excluded.status,
                progress = excluded.progress,
                filename = excluded.filename,
                media_type = excluded.media_type,
                last_chunk = excluded.last_chunk,
                message = excluded.message,
                output_path = excluded.output_path,
                updated_at = excluded.updated_at,
                convert_to = excluded.convert_to
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.source)
        .bind(&record.format)
        .bind(record.priority as i64)
        .bind(record.save_path.to_string_lossy().into_owned())
        .bind(record.status.as_str())
        .bind(record.progress)
        .bind(&record.filename)
        .bind(&record.media_type)
        .bind(record.last_chunk)
        .bind(&record.message)
        .bind(
            record
                .output_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        )
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(&record.convert_to)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Update only the status of an existing record (used by the CLI when no
    /// scheduler is running). Returns false if the id is unknown.
    pub async fn set_status(&self, id: JobId, status: JobStatus) -> Result<bool> {
        let now = unix_timestamp();
        let r = sqlx::query(
            r#"
            UPDATE jobs
            SET status = ?1,
                updated_at = ?2
            WHERE id = ?3
            "#,
        )
        .bind(status.as_str())
        .bind(now)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(r.rows_affected() > 0)
    }
}
