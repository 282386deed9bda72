//! Applies executor events to the queue state.

use std::sync::Weak;

use tokio::sync::mpsc;

use crate::executor::ExecutorEvent;
use crate::job::JobStatus;
use crate::job_db::unix_timestamp;

use super::state::Applied;
use super::Shared;

/// Runs until every executor context is gone or the scheduler is dropped.
pub(super) async fn run_event_pump(mut rx: mpsc::Receiver<ExecutorEvent>, shared: Weak<Shared>) {
    while let Some(event) = rx.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let job_id = event.job_id;
        let generation = event.generation;

        let mut state = shared.state.lock().await;
        match state.apply(event, unix_timestamp()) {
            Applied::Ignored => {
                tracing::trace!(job_id = %job_id, generation, "stale or redundant event dropped");
            }
            Applied::Updated(job) => shared.publish(&job),
            Applied::Finished(job) => {
                if job.status == JobStatus::Completed {
                    tracing::info!(
                        job_id = %job.id,
                        filename = job.filename.as_deref().unwrap_or(""),
                        "download completed"
                    );
                } else {
                    tracing::warn!(
                        job_id = %job.id,
                        message = job.message.as_deref().unwrap_or(""),
                        "download failed"
                    );
                }
                shared.publish(&job);
                shared.dispatch(&mut state).await;
            }
        }
    }
    tracing::debug!("event pump stopped");
}
