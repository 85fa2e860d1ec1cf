//! The execution target: the running container diagnostic commands are issued against.
//!
//! Collectors and the enumerator never talk to a container runtime directly. They go
//! through a [`TargetHandle`], which bounds every call with a timeout and serializes
//! mutating commands behind a lock while read-only execs run in parallel.
//!
//! [`docker::DockerTarget`] implements [`ExecutionTarget`] against the Docker Engine
//! API; tests substitute in-memory fakes.
pub mod docker;
mod error;
mod handle;
#[cfg(test)]
pub(crate) mod testing;

pub use error::TargetError;
pub use handle::TargetHandle;

use std::future::Future;
use std::time::Duration;

/// Captured result of one command executed inside the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// The command was still running when its time limit passed; the streams hold
    /// what it wrote until then and `exit_code` is meaningless.
    pub timed_out: bool,
}

impl ExecOutput {
    pub fn new(exit_code: i64, stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: Vec::new(),
            timed_out: false,
        }
    }

    pub fn with_stderr(mut self, stderr: impl Into<Vec<u8>>) -> Self {
        self.stderr = stderr.into();
        self
    }

    pub fn into_timed_out(mut self) -> Self {
        self.timed_out = true;
        self
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }

    /// Shells report an unknown command with exit status 127.
    pub fn command_not_found(&self) -> bool {
        self.exit_code == 127
    }

    /// Non-empty stderr lines, lossily decoded.
    pub fn stderr_lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.stderr)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

/// Kind of a filesystem change reported by the target's change log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChangeKind {
    Modified,
    Added,
    Deleted,
}

/// One entry of the target's filesystem change log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Change {
    pub path: String,
    pub kind: ChangeKind,
}

impl Change {
    pub fn new(path: impl Into<String>, kind: ChangeKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Capability set the analysis needs from a running container.
///
/// Implementations must tolerate concurrent calls of all three methods; mutating
/// commands are serialized by [`TargetHandle::exec_exclusive`], not by the target.
pub trait ExecutionTarget: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Runs `command` through `sh -c` inside the target.
    fn exec(&self, command: &str) -> impl Future<Output = Result<ExecOutput, Self::Error>> + Send;

    /// Like [`exec`](ExecutionTarget::exec), but stops waiting after `limit` and
    /// returns the output received so far with [`ExecOutput::timed_out`] set.
    ///
    /// The default cannot recover partial output and returns empty streams.
    fn exec_within(
        &self,
        command: &str,
        limit: Duration,
    ) -> impl Future<Output = Result<ExecOutput, Self::Error>> + Send {
        async move {
            match tokio::time::timeout(limit, self.exec(command)).await {
                Ok(result) => result,
                Err(_) => Ok(ExecOutput::default().into_timed_out()),
            }
        }
    }

    /// Returns the target's filesystem changes relative to its image.
    fn diff(&self) -> impl Future<Output = Result<Vec<Change>, Self::Error>> + Send;

    /// Returns the host pid of the target's main process, if it is running.
    fn inspect_pid(&self) -> impl Future<Output = Result<Option<u32>, Self::Error>> + Send;
}
