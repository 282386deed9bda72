//! Supervising task for one engine process.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot};

use crate::allocator::FilenameAllocator;
use crate::config::TranscoderConfig;
use crate::job::JobId;

use super::finish;
use super::parse::{EngineSignal, OutputParser};
use super::{EventKind, ExecutorEvent, Outcome};

pub(super) struct Supervision {
    pub(super) job_id: JobId,
    pub(super) generation: u64,
    pub(super) save_path: PathBuf,
    pub(super) retry_marker: String,
    /// Target format for the finished artifact, if the job asked for one.
    pub(super) convert_to: Option<String>,
    pub(super) transcoder: TranscoderConfig,
    pub(super) allocator: Arc<FilenameAllocator>,
    pub(super) events: mpsc::Sender<ExecutorEvent>,
}

impl Supervision {
    pub(super) async fn emit(&self, kind: EventKind) {
        let event = ExecutorEvent {
            job_id: self.job_id,
            generation: self.generation,
            kind,
        };
        if self.events.send(event).await.is_err() {
            tracing::debug!(job_id = %self.job_id, "event receiver gone");
        }
    }
}

/// Releases a filename reservation when dropped.
pub(super) struct Reservation {
    allocator: Arc<FilenameAllocator>,
    dir: PathBuf,
    name: String,
}

impl Reservation {
    pub(super) fn allocate(allocator: &Arc<FilenameAllocator>, dir: &Path, proposed: &str) -> Self {
        let name = allocator.allocate(dir, proposed);
        Self {
            allocator: Arc::clone(allocator),
            dir: dir.to_path_buf(),
            name,
        }
    }

    pub(super) fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.allocator.release(&self.dir, &self.name);
    }
}

/// What the engine has told us about its output so far.
#[derive(Default)]
pub(super) struct Observed {
    /// Name the engine itself writes, as reported on stdout.
    pub(super) engine_name: Option<String>,
    /// Our reservation for that output in the save directory.
    pub(super) reserved: Option<Reservation>,
    pub(super) media_type: Option<String>,
    /// Last stderr line that was not retry noise.
    pub(super) last_error: Option<String>,
}

fn media_type_of(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    (!stem.is_empty() && !ext.is_empty()).then(|| ext.to_ascii_lowercase())
}

impl Observed {
    /// Reserve a name for a newly reported engine output. Returns the reserved
    /// name when it changed.
    fn observe_name(&mut self, sup: &Supervision, engine_name: String) -> Option<String> {
        if self.engine_name.as_deref() == Some(engine_name.as_str()) {
            return None;
        }
        // Drop the old reservation first so a re-reported name can be reused.
        self.reserved = None;
        let reservation = Reservation::allocate(&sup.allocator, &sup.save_path, &engine_name);
        let name = reservation.name().to_string();
        if name != engine_name {
            tracing::info!(
                job_id = %sup.job_id,
                engine_name = %engine_name,
                reserved = %name,
                "output name collides; will rename after download"
            );
        }
        self.engine_name = Some(engine_name);
        self.reserved = Some(reservation);
        Some(name)
    }

    fn note_stderr(&mut self, line: &str, retry_marker: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        if !retry_marker.is_empty() && line.contains(retry_marker) {
            tracing::debug!(line, "engine retry suppressed");
            return;
        }
        self.last_error = Some(line.to_string());
    }
}

async fn apply_signal(sup: &Supervision, observed: &mut Observed, signal: EngineSignal) {
    match signal {
        EngineSignal::Percent { percent, fragment } => {
            sup.emit(EventKind::Progress {
                percent,
                last_chunk: fragment,
            })
            .await;
        }
        EngineSignal::Destination(name) => {
            let media_type = media_type_of(&name);
            if let Some(reserved) = observed.observe_name(sup, name) {
                sup.emit(EventKind::Filename(reserved)).await;
            }
            // Provisional; a later merge/extract line overrides it.
            if let Some(mt) = media_type {
                if observed.media_type.as_deref() != Some(mt.as_str()) {
                    observed.media_type = Some(mt.clone());
                    sup.emit(EventKind::MediaType(mt)).await;
                }
            }
        }
        EngineSignal::Container {
            filename,
            media_type,
        } => {
            if let Some(reserved) = observed.observe_name(sup, filename) {
                sup.emit(EventKind::Filename(reserved)).await;
            }
            if observed.media_type.as_deref() != Some(media_type.as_str()) {
                observed.media_type = Some(media_type.clone());
                sup.emit(EventKind::MediaType(media_type)).await;
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    let Some(pid) = child.id() else {
        return false;
    };
    // SAFETY: plain kill(2) on a pid we spawned and have not reaped yet.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

/// SIGTERM, then SIGKILL once `grace` runs out.
async fn terminate(child: &mut Child, grace: Duration) {
    if send_sigterm(child) {
        if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
            tracing::debug!(?status, "engine exited after SIGTERM");
            return;
        }
    }
    if let Err(e) = child.start_kill() {
        tracing::debug!(error = %e, "engine kill failed (already exited?)");
    }
    let _ = child.wait().await;
}

fn exit_failure_message(status: ExitStatus, last_error: Option<String>) -> String {
    last_error.unwrap_or_else(|| match status.code() {
        Some(code) => format!("engine exited with code {code}"),
        None => "engine terminated by signal".to_string(),
    })
}

pub(super) async fn run(
    sup: Supervision,
    mut child: Child,
    mut stdout: ChildStdout,
    stderr: ChildStderr,
    mut stop_rx: oneshot::Receiver<Duration>,
) {
    let mut parser = OutputParser::new();
    let mut stderr_lines = BufReader::new(stderr).lines();
    let mut observed = Observed::default();
    let mut buf = vec![0u8; 8 * 1024];
    let mut stdout_open = true;
    let mut stderr_open = true;

    let status = loop {
        tokio::select! {
            grace = &mut stop_rx => {
                // A dropped handle means nobody is waiting: kill without grace.
                let grace = grace.unwrap_or(Duration::ZERO);
                terminate(&mut child, grace).await;
                tracing::debug!(job_id = %sup.job_id, generation = sup.generation, "engine stopped");
                return;
            }
            read = stdout.read(&mut buf), if stdout_open => match read {
                Ok(0) => {
                    stdout_open = false;
                    for signal in parser.finish() {
                        apply_signal(&sup, &mut observed, signal).await;
                    }
                }
                Ok(n) => {
                    for signal in parser.feed(&buf[..n]) {
                        apply_signal(&sup, &mut observed, signal).await;
                    }
                }
                Err(e) => {
                    tracing::warn!(job_id = %sup.job_id, error = %e, "engine stdout read failed");
                    stdout_open = false;
                }
            },
            line = stderr_lines.next_line(), if stderr_open => match line {
                Ok(Some(line)) => observed.note_stderr(&line, &sup.retry_marker),
                Ok(None) => stderr_open = false,
                Err(e) => {
                    tracing::warn!(job_id = %sup.job_id, error = %e, "engine stderr read failed");
                    stderr_open = false;
                }
            },
            status = child.wait(), if !stdout_open && !stderr_open => break status,
        }
    };

    let outcome = match status {
        // A stop during placement or conversion abandons it; the transcoder is
        // killed when its future is dropped.
        Ok(status) if status.success() => tokio::select! {
            outcome = finish::finalize(&sup, observed) => outcome,
            _ = &mut stop_rx => {
                tracing::debug!(job_id = %sup.job_id, generation = sup.generation, "finalize abandoned");
                return;
            }
        },
        Ok(status) => {
            tracing::info!(job_id = %sup.job_id, ?status, "engine failed");
            Outcome::Failed {
                message: exit_failure_message(status, observed.last_error.take()),
            }
        }
        Err(e) => Outcome::Failed {
            message: format!("waiting for engine failed: {e}"),
        },
    };
    sup.emit(EventKind::Finished(outcome)).await;
}
