//! Job executor: one supervised engine process per active job.
//!
//! `start` builds the invocation from the format table, spawns the engine
//! with piped output and returns a handle immediately. A supervising task
//! parses stdout into [`ExecutorEvent`]s tagged with the job's run
//! generation, keeps the last meaningful stderr line, and on exit finalizes
//! the artifact (rename to the reserved name, move into `audio/` or `video/`,
//! convert when the job asks for another format).

mod finish;
pub mod format;
pub mod parse;
mod supervise;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::allocator::FilenameAllocator;
use crate::config::{EngineConfig, TranscoderConfig};
use crate::error::ExecutorError;
use crate::job::{Job, JobId};

pub use format::{build_args, build_preview_args, resolve_format, FormatPlan};
pub use parse::{EngineSignal, OutputParser};

/// Extra time allowed for the supervising task to wind down after the grace period.
const STOP_MARGIN: Duration = Duration::from_millis(500);

/// How a finished engine run turned out.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed {
        filename: String,
        media_type: String,
        path: PathBuf,
    },
    Failed {
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Progress {
        percent: f64,
        last_chunk: Option<i64>,
    },
    /// Name reserved for the engine's output in the save directory.
    Filename(String),
    MediaType(String),
    /// Download done; transcoding into this format.
    Converting(String),
    Finished(Outcome),
}

/// One observation from a running executor. `generation` identifies the run
/// that produced it so the scheduler can drop events from a stopped run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorEvent {
    pub job_id: JobId,
    pub generation: u64,
    pub kind: EventKind,
}

/// Everything an executor needs besides the job itself.
#[derive(Clone)]
pub struct ExecutorContext {
    pub engine: EngineConfig,
    pub transcoder: TranscoderConfig,
    pub allocator: Arc<FilenameAllocator>,
    pub events: mpsc::Sender<ExecutorEvent>,
}

/// Owned by the scheduler while the job is active.
#[derive(Debug)]
pub struct ExecutorHandle {
    stop_tx: Option<oneshot::Sender<Duration>>,
    task: JoinHandle<()>,
}

impl ExecutorHandle {
    /// Terminates the engine and waits for the supervising task to end.
    ///
    /// The engine gets SIGTERM and `grace` to exit before it is killed. Once
    /// this returns the task has ended, so the run produces no more events.
    pub async fn stop(mut self, grace: Duration) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(grace);
        }
        if tokio::time::timeout(grace + STOP_MARGIN, &mut self.task)
            .await
            .is_err()
        {
            tracing::warn!("executor did not stop within the grace period; aborting");
            self.task.abort();
            let _ = self.task.await;
        }
    }

    /// A handle with no engine behind it; stops immediately.
    #[cfg(test)]
    pub(crate) fn detached() -> Self {
        let (stop_tx, stop_rx) = oneshot::channel::<Duration>();
        let task = tokio::spawn(async move {
            let _ = stop_rx.await;
        });
        Self {
            stop_tx: Some(stop_tx),
            task,
        }
    }
}

/// Spawns the engine for `job` and starts supervising it.
pub async fn start(
    job: &Job,
    generation: u64,
    ctx: &ExecutorContext,
) -> Result<ExecutorHandle, ExecutorError> {
    tokio::fs::create_dir_all(&job.save_path)
        .await
        .map_err(|source| ExecutorError::SaveDir {
            path: job.save_path.clone(),
            source,
        })?;

    let args = build_args(&job.format, &job.source, &job.save_path, &ctx.engine);
    let mut child = Command::new(&ctx.engine.program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecutorError::Launch {
            program: ctx.engine.program.display().to_string(),
            source,
        })?;

    let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
        let _ = child.start_kill();
        return Err(ExecutorError::MissingPipe);
    };

    tracing::debug!(
        job_id = %job.id,
        generation,
        pid = child.id(),
        format = %job.format,
        "engine started"
    );

    let (stop_tx, stop_rx) = oneshot::channel();
    let supervision = supervise::Supervision {
        job_id: job.id,
        generation,
        save_path: job.save_path.clone(),
        retry_marker: ctx.engine.retry_marker.clone(),
        convert_to: job.convert_to.clone(),
        transcoder: ctx.transcoder.clone(),
        allocator: Arc::clone(&ctx.allocator),
        events: ctx.events.clone(),
    };
    let task = tokio::spawn(supervise::run(supervision, child, stdout, stderr, stop_rx));

    Ok(ExecutorHandle {
        stop_tx: Some(stop_tx),
        task,
    })
}
