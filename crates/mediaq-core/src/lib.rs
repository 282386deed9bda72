//! Download orchestration core for the mediaq media download manager.
//!
//! Accepts download requests, runs a bounded number of external engine
//! processes at a time, tracks their progress, and keeps every job in a
//! SQLite database so history and unfinished work survive restarts.
//! Finished downloads can be re-encoded through an external transcoder.

pub mod allocator;
pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod job_db;
pub mod layout;
pub mod logging;
pub mod metadata;
pub mod preview;
pub mod scheduler;
pub mod transcode;

pub use error::{ExecutorError, MetadataError, QueueError, ToolError};
pub use job::{Job, JobId, JobStatus};
pub use scheduler::{JobRequest, QueueSnapshot, Scheduler};
