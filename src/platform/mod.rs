//! Detection of the machine running the analysis.
//!
//! Decides which syscall trace backend fits the host and whether host pids reported
//! by the container runtime can be traced at all.
mod checks;
mod detect;
mod error;

pub use checks::find_executable;
pub use detect::{OsFamily, Platform, detect, tool_available};
pub use error::{Error, Result};
