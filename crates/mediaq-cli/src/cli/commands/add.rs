//! `mediaq add <urls…>` – queue download jobs.

use anyhow::{Context, Result};
use mediaq_core::job_db::{unix_timestamp, JobDb, JobRecord};
use mediaq_core::layout;
use mediaq_core::JobRequest;
use std::path::Path;

use crate::cli::control_socket::{self, ControlRequest};

/// Validates every URL first, writes the jobs as `queued`, then asks a
/// running daemon (if any) to pick them up.
pub async fn run_add(
    db: &JobDb,
    urls: &[String],
    format: &str,
    priority: i32,
    save_path: &Path,
    convert_to: Option<&str>,
) -> Result<()> {
    let requests: Vec<JobRequest> = urls
        .iter()
        .map(|u| JobRequest::new(u.as_str(), format, priority, save_path).with_convert_to(convert_to))
        .collect();
    for request in &requests {
        request.validate()?;
    }
    layout::ensure_directories(save_path)
        .with_context(|| format!("create save directories under {}", save_path.display()))?;

    let now = unix_timestamp();
    for request in requests {
        let job = request.into_job(now);
        db.upsert_record(&JobRecord::from(&job)).await?;
        println!("Added job {} for URL: {}", job.id, job.source);
    }

    if let Ok(path) = control_socket::default_control_socket_path() {
        match control_socket::send_request(&path, ControlRequest::Refresh).await {
            Ok(Some(reply)) => tracing::debug!(%reply, "daemon refreshed"),
            Ok(None) => println!("No daemon running; start one with `mediaq run`."),
            Err(e) => tracing::warn!("could not notify daemon: {:#}", e),
        }
    }
    Ok(())
}
