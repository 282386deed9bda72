//! `mediaq pause|resume|cancel <id>` – forwarded to a running daemon, or
//! applied to the job database when none is running.

use anyhow::{bail, Result};
use mediaq_core::job_db::JobDb;
use mediaq_core::{JobId, JobStatus, QueueError};

use crate::cli::control_socket::{self, ControlRequest, REPLY_OK};

#[derive(Debug, Clone, Copy)]
enum Action {
    Pause,
    Resume,
    Cancel,
}

impl Action {
    fn request(self, id: JobId) -> ControlRequest {
        match self {
            Action::Pause => ControlRequest::Pause(id),
            Action::Resume => ControlRequest::Resume(id),
            Action::Cancel => ControlRequest::Cancel(id),
        }
    }

    /// Status a stored job moves to while no daemon is running. Active
    /// records here are left over from an interrupted run.
    fn offline_target(self, id: JobId, from: JobStatus) -> Result<JobStatus, QueueError> {
        let (action, allowed, to) = match self {
            Action::Pause => ("pause", from.is_active(), JobStatus::Paused),
            Action::Resume => ("resume", from == JobStatus::Paused, JobStatus::Queued),
            Action::Cancel => ("cancel", !from.is_terminal(), JobStatus::Cancelled),
        };
        if allowed {
            Ok(to)
        } else {
            Err(QueueError::InvalidTransition { id, from, action })
        }
    }
}

async fn apply(db: &JobDb, id: JobId, action: Action) -> Result<()> {
    let path = control_socket::default_control_socket_path()?;
    if let Some(reply) = control_socket::send_request(&path, action.request(id)).await? {
        if reply != REPLY_OK {
            bail!("{}", reply.trim_start_matches("error: "));
        }
        return Ok(());
    }

    let Some(record) = db.get_record(id).await? else {
        return Err(QueueError::NotFound(id).into());
    };
    let to = action.offline_target(id, record.status)?;
    db.set_status(id, to).await?;
    tracing::info!(job_id = %id, status = %to, "job updated without a daemon");
    Ok(())
}

pub async fn run_pause(db: &JobDb, id: JobId) -> Result<()> {
    apply(db, id, Action::Pause).await?;
    println!("Paused job {id}");
    Ok(())
}

pub async fn run_resume(db: &JobDb, id: JobId) -> Result<()> {
    apply(db, id, Action::Resume).await?;
    println!("Resumed job {id}");
    Ok(())
}

pub async fn run_cancel(db: &JobDb, id: JobId) -> Result<()> {
    apply(db, id, Action::Cancel).await?;
    println!("Cancelled job {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offline_transitions_follow_queue_rules() {
        let id = JobId::new();
        assert_eq!(
            Action::Pause.offline_target(id, JobStatus::Downloading).unwrap(),
            JobStatus::Paused
        );
        assert!(Action::Pause.offline_target(id, JobStatus::Queued).is_err());
        assert_eq!(
            Action::Resume.offline_target(id, JobStatus::Paused).unwrap(),
            JobStatus::Queued
        );
        assert!(Action::Resume.offline_target(id, JobStatus::Error).is_err());
        assert_eq!(
            Action::Cancel.offline_target(id, JobStatus::Queued).unwrap(),
            JobStatus::Cancelled
        );
        let err = Action::Cancel
            .offline_target(id, JobStatus::Completed)
            .unwrap_err();
        assert_eq!(err.to_string(), format!("cannot cancel job {id} while it is completed"));
    }

    #[test]
    fn actions_map_to_control_requests() {
        let id = JobId::new();
        assert_eq!(Action::Pause.request(id), ControlRequest::Pause(id));
        assert_eq!(Action::Cancel.request(id).to_line(), format!("cancel {id}"));
    }
}
