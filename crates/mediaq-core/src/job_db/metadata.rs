//! Metadata cache: engine results keyed by source URL with an expiry.

use anyhow::Result;
use sqlx::Row;

use super::db::{unix_timestamp, JobDb};
use crate::metadata::MediaMetadata;

impl JobDb {
    /// Cached metadata for `source`, if present and not expired.
    pub async fn get_cached_metadata(&self, source: &str) -> Result<Option<MediaMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT payload_json FROM metadata_cache
            WHERE source = ?1 AND expires_at > ?2
            "#,
        )
        .bind(source)
        .bind(unix_timestamp())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.get("payload_json");
        Ok(Some(serde_json::from_str(&payload)?))
    }

    /// Store `meta` for `source`, valid for `ttl_secs`.
    pub async fn cache_metadata(
        &self,
        source: &str,
        meta: &MediaMetadata,
        ttl_secs: u64,
    ) -> Result<()> {
        let expires_at = unix_timestamp().saturating_add(ttl_secs as i64);
        let payload = serde_json::to_string(meta)?;
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO metadata_cache (source, payload_json, expires_at)
            VALUES (?1, ?2, ?3)
            "#,
        )
        .bind(source)
        .bind(payload)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
