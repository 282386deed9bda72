//! Control socket: server (during `mediaq run`) and client (for pause/resume/cancel/add).
//! Protocol: one request line ("pause <id>", "resume <id>", "cancel <id>",
//! "refresh"), answered by one line: "ok" or "error: <reason>".

use anyhow::{Context, Result};
use mediaq_core::config;
use mediaq_core::{JobId, Scheduler};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

pub const REPLY_OK: &str = "ok";

/// `~/.local/state/mediaq/control.sock`
pub fn default_control_socket_path() -> Result<PathBuf> {
    Ok(config::state_dir()?.join("control.sock"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    Pause(JobId),
    Resume(JobId),
    Cancel(JobId),
    /// Pick up jobs queued in the database since the daemon started.
    Refresh,
}

impl ControlRequest {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut parts = line.split_whitespace();
        let verb = parts.next().unwrap_or_default();
        let arg = parts.next();
        if parts.next().is_some() {
            return Err(format!("trailing input in {line:?}"));
        }
        let id = || -> Result<JobId, String> {
            arg.ok_or_else(|| format!("{verb} needs a job id"))?
                .parse()
                .map_err(|e| format!("bad job id: {e}"))
        };
        match verb {
            "pause" => Ok(ControlRequest::Pause(id()?)),
            "resume" => Ok(ControlRequest::Resume(id()?)),
            "cancel" => Ok(ControlRequest::Cancel(id()?)),
            "refresh" if arg.is_none() => Ok(ControlRequest::Refresh),
            "" => Err("empty request".to_string()),
            other => Err(format!("unknown command {other:?}")),
        }
    }

    pub fn to_line(self) -> String {
        match self {
            ControlRequest::Pause(id) => format!("pause {id}"),
            ControlRequest::Resume(id) => format!("resume {id}"),
            ControlRequest::Cancel(id) => format!("cancel {id}"),
            ControlRequest::Refresh => "refresh".to_string(),
        }
    }
}

async fn handle(scheduler: &Scheduler, request: ControlRequest) -> String {
    let result = match request {
        ControlRequest::Pause(id) => scheduler.pause(id).await,
        ControlRequest::Resume(id) => scheduler.resume(id).await,
        ControlRequest::Cancel(id) => scheduler.cancel(id).await,
        ControlRequest::Refresh => scheduler.restore().await.map(|n| {
            tracing::debug!(loaded = n, "refresh via control socket");
        }),
    };
    match result {
        Ok(()) => REPLY_OK.to_string(),
        Err(e) => format!("error: {e}"),
    }
}

async fn serve_connection(scheduler: Scheduler, stream: UnixStream) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let reply = match ControlRequest::parse(line.trim()) {
            Ok(request) => handle(&scheduler, request).await,
            Err(e) => format!("error: {e}"),
        };
        if write.write_all(format!("{reply}\n").as_bytes()).await.is_err() {
            break;
        }
    }
}

/// Binds `path` (replacing a stale socket) and serves requests against
/// `scheduler` until the returned task is aborted.
pub fn spawn_control_listener(
    scheduler: Scheduler,
    path: impl AsRef<Path>,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = path.as_ref().to_path_buf();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    let handle = tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(serve_connection(scheduler.clone(), stream));
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    });
    Ok(handle)
}

/// Sends one request and returns the reply line, or `None` when no daemon
/// is listening on `socket_path`.
pub async fn send_request(socket_path: &Path, request: ControlRequest) -> Result<Option<String>> {
    if !socket_path.exists() {
        return Ok(None);
    }
    let mut stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
            tracing::debug!(path = %socket_path.display(), "stale control socket");
            return Ok(None);
        }
        Err(e) => return Err(e).context("connect to control socket"),
    };
    let msg = format!("{}\n", request.to_line());
    stream.write_all(msg.as_bytes()).await?;
    let mut lines = BufReader::new(stream).lines();
    let reply = lines
        .next_line()
        .await?
        .context("daemon closed the control socket without replying")?;
    Ok(Some(reply))
}
