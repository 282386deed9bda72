//! `mediaq run` – restore unfinished jobs and run the queue.

use anyhow::Result;
use mediaq_core::config::MediaqConfig;
use mediaq_core::job_db::JobDb;
use mediaq_core::{Job, JobId, JobStatus, Scheduler};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::cli::control_socket;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Decides which job updates are worth a line on the terminal: every status
/// change, and progress at most once per interval per job.
#[derive(Default)]
struct ProgressView {
    last: HashMap<JobId, (JobStatus, Instant)>,
}

impl ProgressView {
    fn line(&mut self, job: &Job, now: Instant) -> Option<String> {
        let changed = match self.last.get(&job.id) {
            Some((status, at)) => {
                *status != job.status || now.duration_since(*at) >= PROGRESS_INTERVAL
            }
            None => true,
        };
        if !changed {
            return None;
        }
        if job.status.is_terminal() {
            self.last.remove(&job.id);
        } else {
            self.last.insert(job.id, (job.status, now));
        }
        let short = job.id.to_string();
        let short = short.get(..8).unwrap_or(&short);
        Some(format!(
            "  {short}  {:<11} {:>5.1}%  {}",
            job.status.as_str(),
            job.progress,
            job.message.as_deref().unwrap_or("")
        ))
    }
}

async fn print_progress(mut updates: broadcast::Receiver<Job>) {
    let mut view = ProgressView::default();
    loop {
        match updates.recv().await {
            Ok(job) => {
                if let Some(line) = view.line(&job, Instant::now()) {
                    println!("{line}");
                }
            }
            Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "progress display lagged"),
            Err(RecvError::Closed) => break,
        }
    }
}

pub async fn run_daemon(cfg: MediaqConfig, db: JobDb, watch: bool) -> Result<()> {
    let scheduler = Scheduler::new(cfg, db);
    let printer = tokio::spawn(print_progress(scheduler.subscribe()));

    let restored = scheduler.restore().await?;
    if restored > 0 {
        tracing::info!("restored {} job(s) from previous run", restored);
    }

    let socket_path = control_socket::default_control_socket_path()?;
    let listener = match control_socket::spawn_control_listener(scheduler.clone(), &socket_path) {
        Ok(handle) => {
            tracing::debug!(path = %socket_path.display(), "control socket listening");
            Some(handle)
        }
        Err(e) => {
            tracing::warn!("control socket unavailable: {:#}", e);
            None
        }
    };

    if watch {
        tokio::signal::ctrl_c().await?;
    } else {
        tokio::select! {
            _ = scheduler.wait_idle() => {}
            res = tokio::signal::ctrl_c() => res?,
        }
    }

    scheduler.shutdown().await;
    if let Some(handle) = listener {
        handle.abort();
        let _ = std::fs::remove_file(&socket_path);
    }
    printer.abort();

    if restored == 0 && !watch {
        println!("No queued jobs.");
    }
    Ok(())
}
