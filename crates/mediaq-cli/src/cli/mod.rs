//! CLI for the mediaq download manager.

mod commands;
mod control_socket;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mediaq_core::config;
use mediaq_core::job_db::JobDb;
use mediaq_core::JobId;
use std::path::{Path, PathBuf};

use commands::{
    run_add, run_cancel, run_convert, run_daemon, run_history, run_info, run_pause, run_preview,
    run_resume, run_status,
};

/// Top-level CLI for the mediaq download manager.
#[derive(Debug, Parser)]
#[command(name = "mediaq")]
#[command(about = "mediaq: queued media downloads through yt-dlp", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Queue one job per URL.
    Add {
        /// Media page URLs (http/https).
        #[arg(required = true)]
        urls: Vec<String>,

        /// Format key, e.g. mp3, mp3-320, mp4-1080p, best.
        #[arg(long, short = 'f', default_value = "best")]
        format: String,

        /// Higher runs first; equal priorities run in submission order.
        #[arg(long, short = 'p', default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Save directory (default: `download_root` from config, else the current directory).
        #[arg(long, value_name = "DIR")]
        save_path: Option<PathBuf>,

        /// Re-encode each finished download to this format (the download is kept).
        #[arg(long, value_name = "FORMAT")]
        convert_to: Option<String>,
    },

    /// Run queued jobs, listening for pause/resume/cancel on the control socket.
    Run {
        /// Keep running after the queue drains (stop with Ctrl-C).
        #[arg(long)]
        watch: bool,
    },

    /// Show one job.
    Status {
        /// Job identifier.
        id: JobId,
    },

    /// List every job, newest first.
    History,

    /// Pause a running job.
    Pause {
        /// Job identifier.
        id: JobId,
    },

    /// Put a paused job back in the queue.
    Resume {
        /// Job identifier.
        id: JobId,
    },

    /// Cancel a job that has not finished.
    Cancel {
        /// Job identifier.
        id: JobId,
    },

    /// Fetch title, duration, and available formats for a URL.
    Info {
        /// Media page URL.
        url: String,
    },

    /// Download a short clip of a URL into `preview/` under the download root.
    Preview {
        /// Media page URL.
        url: String,

        /// Format key, as for `add`.
        #[arg(long, short = 'f', default_value = "best")]
        format: String,
    },

    /// Re-encode a file on disk; the result is written next to it.
    Convert {
        /// File to convert.
        input: PathBuf,

        /// Target container, e.g. mp3, mp4, wav.
        format: String,
    },
}

/// Picks the directory downloads land in. Jobs may run later from another
/// working directory, so a relative choice is anchored at `cwd`.
fn resolve_save_path(chosen: Option<PathBuf>, cwd: &Path) -> PathBuf {
    match chosen {
        Some(p) if p.is_absolute() => p,
        Some(p) => cwd.join(p),
        None => cwd.to_path_buf(),
    }
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let db = JobDb::open_default().await?;

        match cli.command {
            CliCommand::Add {
                urls,
                format,
                priority,
                save_path,
                convert_to,
            } => {
                let cwd = std::env::current_dir().context("resolve current directory")?;
                let save_path =
                    resolve_save_path(save_path.or_else(|| cfg.download_root.clone()), &cwd);
                run_add(&db, &urls, &format, priority, &save_path, convert_to.as_deref()).await?
            }
            CliCommand::Run { watch } => run_daemon(cfg, db, watch).await?,
            CliCommand::Status { id } => run_status(&db, id).await?,
            CliCommand::History => run_history(&db).await?,
            CliCommand::Pause { id } => run_pause(&db, id).await?,
            CliCommand::Resume { id } => run_resume(&db, id).await?,
            CliCommand::Cancel { id } => run_cancel(&db, id).await?,
            CliCommand::Info { url } => run_info(&cfg, &db, &url).await?,
            CliCommand::Preview { url, format } => {
                let cwd = std::env::current_dir().context("resolve current directory")?;
                let root = resolve_save_path(cfg.download_root.clone(), &cwd);
                run_preview(&cfg, &root, &url, &format).await?
            }
            CliCommand::Convert { input, format } => {
                let cwd = std::env::current_dir().context("resolve current directory")?;
                run_convert(&cfg, &resolve_save_path(Some(input), &cwd), &format).await?
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
