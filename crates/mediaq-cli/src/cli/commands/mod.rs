//! CLI command handlers, one file per command.

mod add;
mod convert;
mod history;
mod info;
mod lifecycle;
mod preview;
mod run;
mod status;

pub use add::run_add;
pub use convert::run_convert;
pub use history::run_history;
pub use info::run_info;
pub use lifecycle::{run_cancel, run_pause, run_resume};
pub use preview::run_preview;
pub use run::run_daemon;
pub use status::run_status;
