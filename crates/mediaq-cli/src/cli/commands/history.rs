//! `mediaq history` – every job, newest first.

use anyhow::Result;
use mediaq_core::job_db::JobDb;

pub async fn run_history(db: &JobDb) -> Result<()> {
    let records = db.list_records().await?;
    if records.is_empty() {
        println!("No jobs in database.");
        return Ok(());
    }
    println!(
        "{:<36} {:<12} {:>6} {:<10} {}",
        "ID", "STATUS", "PROG", "FORMAT", "SOURCE"
    );
    for r in records {
        println!(
            "{:<36} {:<12} {:>5.1}% {:<10} {}",
            r.id,
            r.status.as_str(),
            r.progress,
            r.format,
            r.source
        );
    }
    Ok(())
}
