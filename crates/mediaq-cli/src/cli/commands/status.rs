//! `mediaq status <id>` – show one job.

use anyhow::{bail, Result};
use mediaq_core::job_db::JobDb;
use mediaq_core::{Job, JobId};

pub(super) fn describe(job: &Job) -> String {
    let mut lines = vec![
        format!("id:        {}", job.id),
        format!("source:    {}", job.source),
        format!("format:    {}", job.format),
        format!("priority:  {}", job.priority),
        format!("status:    {}", job.status),
        format!("progress:  {:.1}%", job.progress),
        format!("save path: {}", job.save_path.display()),
    ];
    if let Some(target) = &job.convert_to {
        lines.push(format!("convert:   {target}"));
    }
    if let Some(name) = &job.filename {
        lines.push(format!("filename:  {name}"));
    }
    if let Some(path) = &job.output_path {
        lines.push(format!("output:    {}", path.display()));
    }
    if let Some(msg) = &job.message {
        lines.push(format!("message:   {msg}"));
    }
    lines.join("\n")
}

pub async fn run_status(db: &JobDb, id: JobId) -> Result<()> {
    let Some(record) = db.get_record(id).await? else {
        bail!("job {id} not found");
    };
    println!("{}", describe(&Job::from(record)));
    Ok(())
}
