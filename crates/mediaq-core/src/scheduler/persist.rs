//! Background task that writes job snapshots through to the database.
//!
//! Snapshots are queued in the order the scheduler produced them, so the
//! last write for a job is always its latest state. Failures are logged and
//! never reach the job.

use tokio::sync::{mpsc, oneshot};

use crate::job_db::{JobDb, JobRecord};

enum PersistOp {
    Upsert(JobRecord),
    /// Answered once every earlier op has been written.
    Flush(oneshot::Sender<()>),
}

#[derive(Clone)]
pub(super) struct Persister {
    tx: mpsc::UnboundedSender<PersistOp>,
}

impl Persister {
    /// Spawns the persistence loop; it ends when every `Persister` is dropped.
    pub(super) fn spawn(db: JobDb) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_persistence_loop(rx, db));
        Self { tx }
    }

    pub(super) fn upsert(&self, record: JobRecord) {
        if self.tx.send(PersistOp::Upsert(record)).is_err() {
            tracing::warn!("persistence worker gone; job update dropped");
        }
    }

    /// Waits until everything queued so far is in the database.
    pub(super) async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(PersistOp::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}

async fn write_pending(db: &JobDb, pending: &mut Vec<JobRecord>) {
    for record in pending.drain(..) {
        if let Err(e) = db.upsert_record(&record).await {
            tracing::warn!(job_id = %record.id, error = %e, "durable job update failed");
        }
    }
}

/// Drains whatever is queued at each wakeup and keeps only the newest
/// snapshot per job, so bursts of progress lines cost one write per job.
async fn run_persistence_loop(mut rx: mpsc::UnboundedReceiver<PersistOp>, db: JobDb) {
    let mut pending: Vec<JobRecord> = Vec::new();
    while let Some(first) = rx.recv().await {
        let mut op = Some(first);
        while let Some(current) = op.take() {
            match current {
                PersistOp::Upsert(record) => {
                    match pending.iter_mut().find(|r| r.id == record.id) {
                        Some(slot) => *slot = record,
                        None => pending.push(record),
                    }
                }
                PersistOp::Flush(done) => {
                    write_pending(&db, &mut pending).await;
                    let _ = done.send(());
                }
            }
            op = rx.try_recv().ok();
        }
        write_pending(&db, &mut pending).await;
    }
}
