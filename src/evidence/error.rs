use std::path::PathBuf;
use std::time::Duration;

use crate::fsutil;
use crate::target::TargetError;

/// Reasons a collector could not deliver complete evidence.
///
/// Never fatal to an analysis: the collector records the error on its
/// [`EvidenceSet`](super::EvidenceSet) and marks it as partial.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("`{tool}` is not available")]
    ToolMissing { tool: String },

    #[error("`{tool}` was denied the required privileges: {detail}")]
    PermissionDenied { tool: String, detail: String },

    #[error("`{command}` exited with {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i64,
        stderr: String,
    },

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("collector did not finish within {0:?}")]
    Timeout(Duration),

    #[error("tracer exited before the trace window elapsed ({status}): {stderr}")]
    TracerExited { status: String, stderr: String },

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare trace artifact `{path}`: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    ReadOutput(#[from] fsutil::ReadError),

    #[error("no trace backend is available on this platform")]
    NoBackend,

    #[error("target has no running main process")]
    NotRunning,

    #[error("collection was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, CollectorError>;
