//! The scheduler's single owned structure: one entry per job in memory, the
//! wait list, and the slot accounting. Every method here runs under the
//! scheduler's lock and never awaits.

use std::collections::HashMap;

use crate::error::QueueError;
use crate::executor::{EventKind, ExecutorEvent, ExecutorHandle, Outcome};
use crate::job::{Job, JobId, JobStatus};

use super::queue::WaitList;

pub(super) const MSG_QUEUED: &str = "Waiting in queue...";
pub(super) const MSG_STARTING: &str = "Starting download...";
pub(super) const MSG_COMPLETED: &str = "Download completed";
pub(super) const MSG_PAUSED: &str = "Paused";
pub(super) const MSG_CANCELLED: &str = "Cancelled";
pub(super) const MSG_RECOVERED: &str = "Recovered after restart";

fn transition_error(id: JobId, current: Option<JobStatus>, action: &'static str) -> QueueError {
    match current {
        Some(from) => QueueError::InvalidTransition { id, from, action },
        None => QueueError::NotFound(id),
    }
}

fn downloading_message(progress: f64) -> String {
    format!("Downloading: {}%", progress.round() as i64)
}

/// A job the scheduler currently owns (queued, active, or paused).
pub(super) struct Entry {
    pub(super) job: Job,
    /// Submission rank; kept across pause/resume.
    pub(super) seq: u64,
    /// Bumped whenever a run is started or stopped; events from older runs are dropped.
    pub(super) generation: u64,
    pub(super) executor: Option<ExecutorHandle>,
    /// The previous run is still being stopped; not dispatchable until confirmed.
    pub(super) draining: bool,
}

/// A job whose executor must be stopped outside the lock.
pub(super) struct Stopping {
    pub(super) job: Job,
    pub(super) handle: Option<ExecutorHandle>,
}

/// Result of applying one executor event.
#[derive(Debug)]
pub(super) enum Applied {
    Ignored,
    Updated(Job),
    /// Job reached a terminal state and left memory.
    Finished(Job),
}

/// In-memory jobs grouped for display.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    /// `starting`/`downloading`, in submission order.
    pub active: Vec<Job>,
    /// `queued`, in dispatch order. Resumed jobs whose previous engine is
    /// still stopping come last.
    pub queued: Vec<Job>,
    pub paused: Vec<Job>,
}

pub(super) struct QueueState {
    entries: HashMap<JobId, Entry>,
    wait: WaitList,
    /// Executors being stopped; they keep their slot until confirmed gone.
    draining: usize,
    next_seq: u64,
    ceiling: usize,
    closed: bool,
}

impl QueueState {
    pub(super) fn new(ceiling: usize) -> Self {
        Self {
            entries: HashMap::new(),
            wait: WaitList::default(),
            draining: 0,
            next_seq: 0,
            ceiling: ceiling.max(1),
            closed: false,
        }
    }

    pub(super) fn contains(&self, id: JobId) -> bool {
        self.entries.contains_key(&id)
    }

    pub(super) fn job(&self, id: JobId) -> Option<&Job> {
        self.entries.get(&id).map(|e| &e.job)
    }

    /// Slots in use: bound executors plus executors still being stopped.
    pub(super) fn active_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.job.status.is_active())
            .count()
            + self.draining
    }

    /// Nothing running or being stopped, and nothing left to dispatch. Once
    /// closed, waiting jobs no longer count.
    pub(super) fn is_idle(&self) -> bool {
        (self.closed || self.wait.is_empty()) && self.active_count() == 0
    }

    pub(super) fn is_closed(&self) -> bool {
        self.closed
    }

    /// Take ownership of a `queued` or `paused` job. Queued jobs enter the wait list.
    pub(super) fn admit(&mut self, job: Job) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if job.status == JobStatus::Queued {
            self.wait.push(job.id, job.priority, seq);
        }
        self.entries.insert(
            job.id,
            Entry {
                job,
                seq,
                generation: 0,
                executor: None,
                draining: false,
            },
        );
    }

    /// Pop the best waiting job if a slot is free and mark it `starting`.
    /// The caller binds an executor (or records the launch failure) before
    /// releasing the lock.
    pub(super) fn next_dispatch(&mut self, now: i64) -> Option<(Job, u64)> {
        if self.closed || self.active_count() >= self.ceiling {
            return None;
        }
        while let Some(id) = self.wait.pop() {
            let Some(entry) = self.entries.get_mut(&id) else {
                continue;
            };
            entry.generation += 1;
            entry.job.status = JobStatus::Starting;
            entry.job.message = Some(MSG_STARTING.to_string());
            entry.job.updated_at = now;
            return Some((entry.job.clone(), entry.generation));
        }
        None
    }

    pub(super) fn bind(&mut self, id: JobId, handle: ExecutorHandle) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.executor = Some(handle);
        }
    }

    /// The engine could not be started: the job goes straight to `error`.
    pub(super) fn fail_launch(&mut self, id: JobId, message: String, now: i64) -> Option<Job> {
        let mut entry = self.entries.remove(&id)?;
        entry.job.status = JobStatus::Error;
        entry.job.message = Some(message);
        entry.job.updated_at = now;
        Some(entry.job)
    }

    pub(super) fn apply(&mut self, event: ExecutorEvent, now: i64) -> Applied {
        let Some(entry) = self.entries.get_mut(&event.job_id) else {
            return Applied::Ignored;
        };
        if entry.generation != event.generation || !entry.job.status.is_active() {
            return Applied::Ignored;
        }
        let job = &mut entry.job;

        match event.kind {
            EventKind::Progress {
                percent,
                last_chunk,
            } => {
                let started = job.status == JobStatus::Starting;
                if started {
                    job.status = JobStatus::Downloading;
                }
                let advanced = job.apply_progress(percent);
                let chunk_changed = last_chunk.is_some() && last_chunk != job.last_chunk;
                if chunk_changed {
                    job.last_chunk = last_chunk;
                }
                if !(started || advanced || chunk_changed) {
                    return Applied::Ignored;
                }
                job.message = Some(downloading_message(job.progress));
            }
            EventKind::Filename(name) => job.filename = Some(name),
            EventKind::MediaType(media_type) => job.media_type = Some(media_type),
            EventKind::Converting(target) => {
                job.message = Some(format!("Converting to {target}..."));
            }
            EventKind::Finished(outcome) => {
                let Some(mut entry) = self.entries.remove(&event.job_id) else {
                    return Applied::Ignored;
                };
                let job = &mut entry.job;
                match outcome {
                    Outcome::Completed {
                        filename,
                        media_type,
                        path,
                    } => {
                        job.status = JobStatus::Completed;
                        job.progress = 100.0;
                        job.filename = Some(filename);
                        job.media_type = Some(media_type);
                        job.output_path = Some(path);
                        job.message = Some(MSG_COMPLETED.to_string());
                    }
                    Outcome::Failed { message } => {
                        job.status = JobStatus::Error;
                        job.message = Some(message);
                    }
                }
                job.updated_at = now;
                return Applied::Finished(entry.job);
            }
        }
        job.updated_at = now;
        Applied::Updated(job.clone())
    }

    /// `starting`/`downloading` → `paused`. The run is invalidated here; the
    /// returned handle is stopped by the caller after unlocking.
    pub(super) fn pause(&mut self, id: JobId, now: i64) -> Result<Stopping, QueueError> {
        let entry = match self.entries.get_mut(&id) {
            Some(e) if e.job.status.is_active() => e,
            other => return Err(transition_error(id, other.map(|e| e.job.status), "pause")),
        };
        entry.generation += 1;
        entry.job.status = JobStatus::Paused;
        entry.job.message = Some(MSG_PAUSED.to_string());
        entry.job.updated_at = now;
        let handle = entry.executor.take();
        entry.draining = handle.is_some();
        let job = entry.job.clone();
        if handle.is_some() {
            self.draining += 1;
        }
        Ok(Stopping { job, handle })
    }

    /// `paused` → `queued`, keeping priority and submission rank. A job whose
    /// previous engine is still stopping enters the wait list only once
    /// `stop_confirmed` runs for it.
    pub(super) fn resume(&mut self, id: JobId, now: i64) -> Result<Job, QueueError> {
        let entry = match self.entries.get_mut(&id) {
            Some(e) if e.job.status == JobStatus::Paused => e,
            other => return Err(transition_error(id, other.map(|e| e.job.status), "resume")),
        };
        entry.job.status = JobStatus::Queued;
        entry.job.message = Some(MSG_QUEUED.to_string());
        entry.job.updated_at = now;
        if !entry.draining {
            self.wait.push(id, entry.job.priority, entry.seq);
        }
        Ok(entry.job.clone())
    }

    /// Any in-memory job → `cancelled`; it leaves the wait list and memory.
    pub(super) fn cancel(&mut self, id: JobId, now: i64) -> Result<Stopping, QueueError> {
        let Some(mut entry) = self.entries.remove(&id) else {
            return Err(QueueError::NotFound(id));
        };
        self.wait.remove(id);
        entry.generation += 1;
        entry.job.status = JobStatus::Cancelled;
        entry.job.message = Some(MSG_CANCELLED.to_string());
        entry.job.updated_at = now;
        let handle = entry.executor.take();
        if handle.is_some() {
            self.draining += 1;
        }
        Ok(Stopping {
            job: entry.job,
            handle,
        })
    }

    /// Allowed while `queued` or `paused`.
    pub(super) fn set_priority(&mut self, id: JobId, priority: i32, now: i64) -> Result<Job, QueueError> {
        let entry = match self.entries.get_mut(&id) {
            Some(e) if matches!(e.job.status, JobStatus::Queued | JobStatus::Paused) => e,
            other => {
                return Err(transition_error(
                    id,
                    other.map(|e| e.job.status),
                    "reprioritize",
                ))
            }
        };
        entry.job.priority = priority;
        entry.job.updated_at = now;
        if entry.job.status == JobStatus::Queued {
            self.wait.reprioritize(id, priority);
        }
        Ok(entry.job.clone())
    }

    /// The executor stopped for job `id` is confirmed gone; its slot is free
    /// again. A job resumed in the meantime becomes dispatchable now.
    pub(super) fn stop_confirmed(&mut self, id: JobId) {
        self.release_slot();
        if let Some(entry) = self.entries.get_mut(&id) {
            if entry.draining {
                entry.draining = false;
                if entry.job.status == JobStatus::Queued {
                    self.wait.push(id, entry.job.priority, entry.seq);
                }
            }
        }
    }

    pub(super) fn release_slot(&mut self) {
        self.draining = self.draining.saturating_sub(1);
    }

    /// Refuse further dispatch and hand back every bound executor. Interrupted
    /// jobs leave memory with their stored status untouched, so a restart
    /// re-queues them; their slots count as draining until released.
    pub(super) fn close(&mut self) -> Vec<ExecutorHandle> {
        self.closed = true;
        let interrupted: Vec<JobId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.executor.is_some())
            .map(|(id, _)| *id)
            .collect();
        let mut handles = Vec::with_capacity(interrupted.len());
        for id in interrupted {
            if let Some(handle) = self.entries.remove(&id).and_then(|mut e| e.executor.take()) {
                handles.push(handle);
            }
        }
        self.draining += handles.len();
        handles
    }

    pub(super) fn snapshot(&self) -> QueueSnapshot {
        let mut active: Vec<&Entry> = Vec::new();
        let mut paused: Vec<&Entry> = Vec::new();
        // Resumed jobs still waiting for their old engine to stop.
        let mut held_back: Vec<&Entry> = Vec::new();
        for entry in self.entries.values() {
            match entry.job.status {
                s if s.is_active() => active.push(entry),
                JobStatus::Paused => paused.push(entry),
                JobStatus::Queued if entry.draining => held_back.push(entry),
                _ => {}
            }
        }
        active.sort_by_key(|e| e.seq);
        paused.sort_by_key(|e| e.seq);
        held_back.sort_by_key(|e| e.seq);
        let mut queued: Vec<Job> = self
            .wait
            .ids()
            .filter_map(|id| self.entries.get(&id).map(|e| e.job.clone()))
            .collect();
        queued.extend(held_back.into_iter().map(|e| e.job.clone()));
        QueueSnapshot {
            active: active.into_iter().map(|e| e.job.clone()).collect(),
            queued,
            paused: paused.into_iter().map(|e| e.job.clone()).collect(),
        }
    }
}
