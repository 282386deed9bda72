//! `mediaq info <url>` – metadata lookup (cached).

use anyhow::Result;
use mediaq_core::config::MediaqConfig;
use mediaq_core::job_db::JobDb;
use mediaq_core::metadata::{self, MediaMetadata};

fn render(meta: &MediaMetadata) -> String {
    let mut out = format!("title:    {}\n", meta.title);
    if let Some(channel) = &meta.channel {
        out.push_str(&format!("channel:  {channel}\n"));
    }
    if let Some(duration) = &meta.duration {
        out.push_str(&format!("duration: {duration}\n"));
    }
    if let Some(views) = meta.view_count {
        out.push_str(&format!("views:    {views}\n"));
    }
    if let Some(date) = &meta.upload_date {
        out.push_str(&format!("uploaded: {date}\n"));
    }
    if let Some(thumb) = &meta.thumbnail {
        out.push_str(&format!("thumb:    {thumb}\n"));
    }
    if !meta.formats.is_empty() {
        out.push_str("formats:\n");
        for f in &meta.formats {
            out.push_str(&format!("  {:<12} {:<6} {:<12} {}\n", f.id, f.ext, f.resolution, f.note));
        }
    }
    out
}

pub async fn run_info(cfg: &MediaqConfig, db: &JobDb, url: &str) -> Result<()> {
    let meta = metadata::fetch_metadata(cfg, Some(db), url).await?;
    print!("{}", render(&meta));
    Ok(())
}
