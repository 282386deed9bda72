//! Persistent job database (SQLite via sqlx).
//!
//! Mirrors every job's externally relevant fields so history and unfinished
//! work survive restarts, and caches metadata lookups.

pub mod db;
mod jobs;
mod metadata;
pub mod types;

pub use db::*;
pub use types::*;

#[cfg(test)]
mod tests;
