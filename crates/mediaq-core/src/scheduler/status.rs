//! Read-only queries: live jobs come from memory, everything else from the
//! job database once pending writes have landed.

use crate::error::QueueError;
use crate::job::{Job, JobId};

use super::{QueueSnapshot, Scheduler};

impl Scheduler {
    /// Current state of one job.
    pub async fn get_status(&self, id: JobId) -> Result<Job, QueueError> {
        if let Some(job) = self.shared.state.lock().await.job(id) {
            return Ok(job.clone());
        }
        self.shared.stored_record(id).await.map(Job::from)
    }

    /// Every job ever submitted, newest first.
    pub async fn list_history(&self) -> Result<Vec<Job>, QueueError> {
        self.shared.persister.flush().await;
        let records = self
            .shared
            .db
            .list_records()
            .await
            .map_err(QueueError::Store)?;
        Ok(records.into_iter().map(Job::from).collect())
    }

    /// Jobs the scheduler currently holds, grouped by what they are doing.
    pub async fn snapshot(&self) -> QueueSnapshot {
        self.shared.state.lock().await.snapshot()
    }
}
