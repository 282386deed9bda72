//! SQLite-backed job database: connection, migrations, timestamp helper.
//!
//! Record CRUD lives in `jobs`, the metadata cache in `metadata`.

use anyhow::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len() + 9);
    out.push_str("sqlite://");
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    out
}

/// Handle to the SQLite-backed job database.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/mediaq/jobs.db` on Debian.
#[derive(Clone)]
pub struct JobDb {
    pub(crate) pool: Pool<Sqlite>,
}

impl JobDb {
    /// Open (or create) the default job database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let state_dir = config::state_dir()?;
        Self::open_at(state_dir.join("jobs.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await?;
        let db = JobDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Open a private in-memory database (single connection so every query sees the same DB).
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = JobDb { pool };
        db.migrate().await?;
        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        // - `status` holds `JobStatus::as_str()`.
        // - `last_chunk` is the engine's resume checkpoint, opaque here.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                format TEXT NOT NULL,
                priority INTEGER NOT NULL DEFAULT 0,
                save_path TEXT NOT NULL,
                status TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0,
                filename TEXT,
                media_type TEXT,
                last_chunk INTEGER,
                message TEXT,
                output_path TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                convert_to TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Databases created before conversions existed lack `convert_to`.
        let columns = sqlx::query("PRAGMA table_info(jobs)")
            .fetch_all(&self.pool)
            .await?;
        let has_convert_to = columns
            .iter()
            .any(|row| row.get::<String, _>("name") == "convert_to");
        if !has_convert_to {
            sqlx::query("ALTER TABLE jobs ADD COLUMN convert_to TEXT")
                .execute(&self.pool)
                .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS metadata_cache (
                source TEXT PRIMARY KEY,
                payload_json TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_uri_escapes_special_chars() {
        assert_eq!(
            path_to_sqlite_uri(Path::new("/home/me/My Files/jobs#1.db")),
            "sqlite:///home/me/My%20Files/jobs%231.db"
        );
    }

    #[tokio::test]
    async fn older_jobs_table_gains_convert_to() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        {
            let pool = SqlitePoolOptions::new()
                .max_connections(1)
                .connect(&(path_to_sqlite_uri(&path) + "?mode=rwc"))
                .await
                .unwrap();
            sqlx::query(
                "CREATE TABLE jobs (
                    id TEXT PRIMARY KEY, source TEXT NOT NULL, format TEXT NOT NULL,
                    priority INTEGER NOT NULL DEFAULT 0, save_path TEXT NOT NULL,
                    status TEXT NOT NULL, progress REAL NOT NULL DEFAULT 0,
                    filename TEXT, media_type TEXT, last_chunk INTEGER, message TEXT,
                    output_path TEXT, created_at INTEGER NOT NULL, updated_at INTEGER NOT NULL
                )",
            )
            .execute(&pool)
            .await
            .unwrap();
            sqlx::query(
                "INSERT INTO jobs (id, source, format, save_path, status, created_at, updated_at)
                 VALUES ('6f1c1f0e-8a52-4a8e-9d7c-2b1f4f0c9a11', 'https://example.com/v', 'mp3', '/srv/dl', 'queued', 1, 1)",
            )
            .execute(&pool)
            .await
            .unwrap();
            pool.close().await;
        }

        let db = JobDb::open_at(&path).await.unwrap();
        let records = db.list_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].convert_to.is_none());
        // Reopening must not try to add the column twice.
        drop(db);
        JobDb::open_at(&path).await.unwrap();
    }

    #[tokio::test]
    async fn open_at_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state dir").join("jobs.db");
        let db = JobDb::open_at(&path).await.unwrap();
        assert!(path.exists());
        assert!(db.list_records().await.unwrap().is_empty());
    }
}
