use std::time::Duration;

/// Errors surfaced by a [`TargetHandle`](super::TargetHandle) call.
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    #[error("`{operation}` on execution target timed out after {timeout:?}")]
    Timeout {
        operation: String,
        timeout: Duration,
    },
    #[error("execution target failed during `{operation}`: {source}")]
    Target {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl TargetError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TargetError::Timeout { .. })
    }
}

pub type Result<T> = std::result::Result<T, TargetError>;
