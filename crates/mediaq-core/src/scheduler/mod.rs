//! Job scheduler and queue.
//!
//! Admits requests, keeps at most `max_concurrent_downloads` jobs in
//! `starting`/`downloading`, orders the rest by priority then submission,
//! and drives pause/resume/cancel. All decisions happen under one lock over
//! [`state::QueueState`]; executor events arrive on a channel and are applied
//! under the same lock by the event pump. Every observable change is written
//! through to the job database by the persistence worker and broadcast to
//! subscribers.

mod events;
mod persist;
mod queue;
mod state;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, Mutex, Notify};

use crate::allocator::FilenameAllocator;
use crate::config::MediaqConfig;
use crate::error::QueueError;
use crate::executor::{self, ExecutorContext, ExecutorHandle};
use crate::job::{validate_source, Job, JobId, JobStatus};
use crate::job_db::{unix_timestamp, JobDb, JobRecord};
use crate::transcode;

use persist::Persister;
use state::{QueueState, Stopping, MSG_CANCELLED, MSG_QUEUED, MSG_RECOVERED};

pub use state::QueueSnapshot;

/// Executor events buffered between the supervising tasks and the pump.
const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Job snapshots buffered per subscriber before the slowest one lags.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// One download request.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub source: String,
    pub format: String,
    pub priority: i32,
    pub save_path: PathBuf,
    /// Re-encode the finished download into this format.
    pub convert_to: Option<String>,
}

impl JobRequest {
    pub fn new(
        source: impl Into<String>,
        format: impl Into<String>,
        priority: i32,
        save_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            format: format.into(),
            priority,
            save_path: save_path.into(),
            convert_to: None,
        }
    }

    pub fn with_convert_to(mut self, format: Option<impl Into<String>>) -> Self {
        self.convert_to = format.map(Into::into);
        self
    }

    /// Rejects a request with a malformed source, an empty format, a save
    /// path that is empty or relative, or an unusable conversion target.
    pub fn validate(&self) -> Result<(), QueueError> {
        validate_source(&self.source).map_err(QueueError::InvalidRequest)?;
        if self.format.trim().is_empty() {
            return Err(QueueError::InvalidRequest("format is empty".to_string()));
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(QueueError::InvalidRequest("save path is empty".to_string()));
        }
        // Jobs may run in a later process with another working directory.
        if !self.save_path.is_absolute() {
            return Err(QueueError::InvalidRequest(format!(
                "save path must be absolute: {}",
                self.save_path.display()
            )));
        }
        if let Some(target) = &self.convert_to {
            transcode::validate_target(target).map_err(QueueError::InvalidRequest)?;
        }
        Ok(())
    }

    /// The `queued` job this request creates. Call `validate` first.
    pub fn into_job(self, now: i64) -> Job {
        let mut job = Job::new(
            self.source.trim(),
            self.format.trim(),
            self.priority,
            self.save_path,
            now,
        );
        job.convert_to = self
            .convert_to
            .and_then(|t| transcode::validate_target(&t).ok());
        job.message = Some(MSG_QUEUED.to_string());
        job
    }
}

struct Shared {
    config: MediaqConfig,
    db: JobDb,
    state: Mutex<QueueState>,
    exec: ExecutorContext,
    persister: Persister,
    updates: broadcast::Sender<Job>,
    idle: Notify,
}

/// Handle to the scheduler. Cheap to clone; all clones drive the same queue.
///
/// Must be created inside a tokio runtime (it spawns the event pump and the
/// persistence worker).
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(config: MediaqConfig, db: JobDb) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let exec = ExecutorContext {
            engine: config.engine.clone(),
            transcoder: config.transcoder.clone(),
            allocator: Arc::new(FilenameAllocator::new()),
            events: events_tx,
        };
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::new(config.ceiling())),
            persister: Persister::spawn(db.clone()),
            config,
            db,
            exec,
            updates,
            idle: Notify::new(),
        });
        tokio::spawn(events::run_event_pump(events_rx, Arc::downgrade(&shared)));
        Self { shared }
    }

    pub fn config(&self) -> &MediaqConfig {
        &self.shared.config
    }

    /// Receives a snapshot of every job after each applied change.
    pub fn subscribe(&self) -> broadcast::Receiver<Job> {
        self.shared.updates.subscribe()
    }

    /// Submit one job. Returns as soon as the job is queued or dispatched.
    pub async fn submit(
        &self,
        source: &str,
        format: &str,
        priority: i32,
        save_path: impl Into<PathBuf>,
    ) -> Result<JobId, QueueError> {
        let ids = self
            .submit_requests(vec![JobRequest::new(source, format, priority, save_path)])
            .await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| QueueError::InvalidRequest("no job created".to_string()))
    }

    /// Submit one job per source, all sharing format, priority, and save path.
    pub async fn submit_batch(
        &self,
        sources: &[String],
        format: &str,
        priority: i32,
        save_path: impl Into<PathBuf>,
    ) -> Result<Vec<JobId>, QueueError> {
        let save_path = save_path.into();
        let requests = sources
            .iter()
            .map(|s| JobRequest::new(s.as_str(), format, priority, save_path.clone()))
            .collect();
        self.submit_requests(requests).await
    }

    /// Submit several requests at once. Either every request is accepted or
    /// none is. All of them are queued before dispatch runs, so priorities
    /// within the batch are honoured even when the ceiling has room.
    pub async fn submit_requests(&self, requests: Vec<JobRequest>) -> Result<Vec<JobId>, QueueError> {
        if requests.is_empty() {
            return Err(QueueError::InvalidRequest("no sources given".to_string()));
        }
        for request in &requests {
            request.validate()?;
        }

        let now = unix_timestamp();
        let mut state = self.shared.state.lock().await;
        if state.is_closed() {
            return Err(QueueError::InvalidRequest(
                "scheduler is shutting down".to_string(),
            ));
        }
        let mut ids = Vec::with_capacity(requests.len());
        for request in requests {
            let job = request.into_job(now);
            tracing::info!(job_id = %job.id, source = %job.source, format = %job.format, priority = job.priority, "job submitted");
            self.shared.publish(&job);
            ids.push(job.id);
            state.admit(job);
        }
        self.shared.dispatch(&mut state).await;
        Ok(ids)
    }

    /// Stop an active job and keep it for a later `resume`.
    pub async fn pause(&self, id: JobId) -> Result<(), QueueError> {
        let handle = {
            let mut state = self.shared.state.lock().await;
            match state.pause(id, unix_timestamp()) {
                Ok(stopping) => self.shared.begin_stop(&state, stopping),
                Err(QueueError::NotFound(_)) => {
                    let record = self.shared.stored_record(id).await?;
                    return Err(QueueError::InvalidTransition {
                        id,
                        from: record.status,
                        action: "pause",
                    });
                }
                Err(e) => return Err(e),
            }
        };
        tracing::info!(job_id = %id, "job paused");
        self.shared.finish_stop(id, handle).await;
        Ok(())
    }

    /// Put a paused job back in the queue with its original priority.
    pub async fn resume(&self, id: JobId) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        let job = match state.resume(id, unix_timestamp()) {
            Ok(job) => job,
            Err(QueueError::NotFound(_)) => {
                // Paused in an earlier run and never restored: adopt it.
                let record = self.shared.stored_record(id).await?;
                if record.status != JobStatus::Paused {
                    return Err(QueueError::InvalidTransition {
                        id,
                        from: record.status,
                        action: "resume",
                    });
                }
                let mut job = Job::from(record);
                job.status = JobStatus::Queued;
                job.message = Some(MSG_QUEUED.to_string());
                job.updated_at = unix_timestamp();
                state.admit(job.clone());
                job
            }
            Err(e) => return Err(e),
        };
        tracing::info!(job_id = %id, priority = job.priority, "job resumed");
        self.shared.publish(&job);
        self.shared.dispatch(&mut state).await;
        Ok(())
    }

    /// Cancel any non-terminal job. The final status is always `cancelled`.
    pub async fn cancel(&self, id: JobId) -> Result<(), QueueError> {
        let handle = {
            let mut state = self.shared.state.lock().await;
            let stopping = match state.cancel(id, unix_timestamp()) {
                Ok(stopping) => stopping,
                Err(QueueError::NotFound(_)) => {
                    let record = self.shared.stored_record(id).await?;
                    if record.status.is_terminal() {
                        return Err(QueueError::InvalidTransition {
                            id,
                            from: record.status,
                            action: "cancel",
                        });
                    }
                    let mut job = Job::from(record);
                    job.status = JobStatus::Cancelled;
                    job.message = Some(MSG_CANCELLED.to_string());
                    job.updated_at = unix_timestamp();
                    Stopping { job, handle: None }
                }
                Err(e) => return Err(e),
            };
            self.shared.begin_stop(&state, stopping)
        };
        tracing::info!(job_id = %id, "job cancelled");
        self.shared.finish_stop(id, handle).await;
        Ok(())
    }

    /// Change the priority of a queued or paused job.
    pub async fn set_priority(&self, id: JobId, priority: i32) -> Result<(), QueueError> {
        let mut state = self.shared.state.lock().await;
        let job = state.set_priority(id, priority, unix_timestamp())?;
        self.shared.publish(&job);
        Ok(())
    }

    /// Reload unfinished work from the database: interrupted runs are
    /// re-queued, paused jobs stay paused. Jobs already held are skipped, so
    /// calling this twice is harmless. Returns how many jobs were loaded.
    pub async fn restore(&self) -> Result<usize, QueueError> {
        // Read under the lock: every change is published under it, so after
        // the flush the database cannot be behind memory. A job that finished
        // between the read and `contains` would otherwise be loaded again.
        let mut state = self.shared.state.lock().await;
        self.shared.persister.flush().await;
        let records = self
            .shared
            .db
            .list_unfinished()
            .await
            .map_err(QueueError::Store)?;

        let now = unix_timestamp();
        let mut loaded = 0;
        for record in records {
            if state.contains(record.id) {
                continue;
            }
            let mut job = Job::from(record);
            if job.status.is_active() {
                tracing::info!(job_id = %job.id, "interrupted job re-queued");
                job.status = JobStatus::Queued;
                job.message = Some(MSG_RECOVERED.to_string());
                job.updated_at = now;
                self.shared.publish(&job);
            }
            state.admit(job);
            loaded += 1;
        }
        tracing::info!(loaded, "jobs restored");
        self.shared.dispatch(&mut state).await;
        Ok(loaded)
    }

    /// Resolves once nothing is queued or running and every update is persisted.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.shared.state.lock().await.is_idle() {
                break;
            }
            notified.await;
        }
        self.shared.persister.flush().await;
    }

    /// Stop every engine and refuse further dispatch. Persisted statuses are
    /// left as they are, so the next `restore` re-queues interrupted jobs.
    pub async fn shutdown(&self) {
        let handles = self.shared.state.lock().await.close();
        let grace = self.shared.config.stop_grace();
        let mut stops = tokio::task::JoinSet::new();
        for handle in handles {
            stops.spawn(handle.stop(grace));
        }
        while stops.join_next().await.is_some() {
            let mut state = self.shared.state.lock().await;
            state.release_slot();
            self.shared.notify_if_idle(&state);
        }
        self.shared.persister.flush().await;
        tracing::info!("scheduler shut down");
    }
}

impl Shared {
    /// Queue a write-through and tell subscribers. Called with the lock held
    /// so snapshots are produced in state order.
    fn publish(&self, job: &Job) {
        self.persister.upsert(JobRecord::from(job));
        let _ = self.updates.send(job.clone());
    }

    /// Fill free slots from the wait list. Launch failures mark the job
    /// `error` and dispatch moves on.
    async fn dispatch(&self, state: &mut QueueState) {
        while let Some((job, generation)) = state.next_dispatch(unix_timestamp()) {
            self.publish(&job);
            match executor::start(&job, generation, &self.exec).await {
                Ok(handle) => {
                    tracing::info!(job_id = %job.id, generation, "job dispatched");
                    state.bind(job.id, handle);
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "engine launch failed");
                    if let Some(failed) = state.fail_launch(job.id, e.to_string(), unix_timestamp()) {
                        self.publish(&failed);
                    }
                }
            }
        }
        self.notify_if_idle(state);
    }

    fn notify_if_idle(&self, state: &QueueState) {
        if state.is_idle() {
            self.idle.notify_waiters();
        }
    }

    /// Publish the paused/cancelled job while still under the lock and hand
    /// back the executor to stop once the lock is released.
    fn begin_stop(&self, state: &QueueState, stopping: Stopping) -> Option<ExecutorHandle> {
        self.publish(&stopping.job);
        self.notify_if_idle(state);
        stopping.handle
    }

    /// Stop the executor outside the lock, then free its slot and dispatch.
    async fn finish_stop(&self, id: JobId, handle: Option<ExecutorHandle>) {
        let Some(handle) = handle else {
            return;
        };
        handle.stop(self.config.stop_grace()).await;
        let mut state = self.state.lock().await;
        state.stop_confirmed(id);
        tracing::debug!(job_id = %id, "executor stopped; slot freed");
        self.dispatch(&mut state).await;
    }

    /// Record for a job that is not in memory, after pending writes land.
    async fn stored_record(&self, id: JobId) -> Result<JobRecord, QueueError> {
        self.persister.flush().await;
        self.db
            .get_record(id)
            .await
            .map_err(QueueError::Store)?
            .ok_or(QueueError::NotFound(id))
    }
}
