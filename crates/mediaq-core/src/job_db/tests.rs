//! Tests for job_db (in-memory database).

use std::path::PathBuf;

use crate::job::{Job, JobStatus};
use crate::job_db::{JobDb, JobRecord};
use crate::metadata::{FormatInfo, MediaMetadata};

fn record(source: &str, created_at: i64) -> JobRecord {
    JobRecord::from(&Job::new(source, "mp3-320", 0, "/srv/dl", created_at))
}

#[tokio::test]
async fn upsert_then_get_roundtrip() {
    let db = JobDb::open_memory().await.unwrap();
    let mut rec = record("https://example.com/a", 100);
    db.upsert_record(&rec).await.unwrap();

    let got = db.get_record(rec.id).await.unwrap().unwrap();
    assert_eq!(got, rec);

    rec.status = JobStatus::Completed;
    rec.progress = 100.0;
    rec.filename = Some("clip.mp3".into());
    rec.media_type = Some("mp3".into());
    rec.last_chunk = Some(12);
    rec.message = Some("Download completed".into());
    rec.output_path = Some(PathBuf::from("/srv/dl/audio/clip.mp3"));
    rec.convert_to = Some("wav".into());
    rec.updated_at = 200;
    db.upsert_record(&rec).await.unwrap();

    let got = db.get_record(rec.id).await.unwrap().unwrap();
    assert_eq!(got, rec);
    assert_eq!(db.list_records().await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_id_is_absent() {
    let db = JobDb::open_memory().await.unwrap();
    let rec = record("https://example.com/a", 1);
    assert!(db.get_record(rec.id).await.unwrap().is_none());
    assert!(!db.set_status(rec.id, JobStatus::Paused).await.unwrap());
}

#[tokio::test]
async fn list_records_newest_first() {
    let db = JobDb::open_memory().await.unwrap();
    let a = record("https://example.com/a", 10);
    let b = record("https://example.com/b", 20);
    // Same timestamp: insertion order breaks the tie.
    let c = record("https://example.com/c", 20);
    for r in [&a, &b, &c] {
        db.upsert_record(r).await.unwrap();
    }
    let ids: Vec<_> = db.list_records().await.unwrap().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![c.id, b.id, a.id]);
}

#[tokio::test]
async fn unfinished_excludes_terminal_records() {
    let db = JobDb::open_memory().await.unwrap();
    let mut queued = record("https://example.com/q", 1);
    let mut paused = record("https://example.com/p", 2);
    let mut done = record("https://example.com/d", 3);
    let mut failed = record("https://example.com/f", 4);
    let mut cancelled = record("https://example.com/c", 5);
    queued.status = JobStatus::Queued;
    paused.status = JobStatus::Paused;
    done.status = JobStatus::Completed;
    failed.status = JobStatus::Error;
    cancelled.status = JobStatus::Cancelled;
    for r in [&queued, &paused, &done, &failed, &cancelled] {
        db.upsert_record(r).await.unwrap();
    }

    let ids: Vec<_> = db
        .list_unfinished()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![queued.id, paused.id]);
}

#[tokio::test]
async fn set_status_updates_only_status() {
    let db = JobDb::open_memory().await.unwrap();
    let mut rec = record("https://example.com/x", 1);
    rec.progress = 33.0;
    db.upsert_record(&rec).await.unwrap();

    assert!(db.set_status(rec.id, JobStatus::Cancelled).await.unwrap());
    let got = db.get_record(rec.id).await.unwrap().unwrap();
    assert_eq!(got.status, JobStatus::Cancelled);
    assert_eq!(got.progress, 33.0);
}

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jobs.db");
    let rec = record("https://example.com/persist", 7);
    {
        let db = JobDb::open_at(&path).await.unwrap();
        db.upsert_record(&rec).await.unwrap();
    }
    let db = JobDb::open_at(&path).await.unwrap();
    assert_eq!(db.get_record(rec.id).await.unwrap(), Some(rec));
}

#[tokio::test]
async fn metadata_cache_honours_expiry() {
    let db = JobDb::open_memory().await.unwrap();
    let meta = MediaMetadata {
        title: "Clip".into(),
        duration: Some("0:42".into()),
        formats: vec![FormatInfo {
            id: "18".into(),
            ext: "mp4".into(),
            resolution: "640x360".into(),
            note: "360p".into(),
        }],
        ..MediaMetadata::default()
    };

    assert!(db.get_cached_metadata("https://e.com/v").await.unwrap().is_none());
    db.cache_metadata("https://e.com/v", &meta, 3600).await.unwrap();
    assert_eq!(
        db.get_cached_metadata("https://e.com/v").await.unwrap(),
        Some(meta.clone())
    );

    // Zero TTL expires immediately.
    db.cache_metadata("https://e.com/v", &meta, 0).await.unwrap();
    assert!(db.get_cached_metadata("https://e.com/v").await.unwrap().is_none());
}
