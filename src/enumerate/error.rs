use std::num::ParseIntError;
use std::time::Duration;

use crate::target::TargetError;

/// The enumeration could not list the target at all. Fatal to an analysis.
#[derive(Debug, thiserror::Error)]
pub enum EnumerationError {
    #[error("failed to run the file listing: {0}")]
    Target(#[from] TargetError),

    #[error("`{tool}` is not available in the target")]
    ToolMissing { tool: String },

    #[error("root `{root}` is not accessible (exit code {exit_code}): {stderr}")]
    RootInaccessible {
        root: String,
        exit_code: i64,
        stderr: String,
    },

    #[error("listing `{root}` produced no entries within {limit:?}")]
    TimedOut { root: String, limit: Duration },
}

/// A listing line that is not `<size> <absolute path>`.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing size field")]
    MissingSize,

    #[error("invalid size '{value}': {source}")]
    InvalidSize {
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("path '{0}' is not absolute")]
    RelativePath(String),
}

pub type Result<T> = std::result::Result<T, EnumerationError>;
