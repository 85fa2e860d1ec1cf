use std::future::Future;
use std::time::Duration;

use tokio::sync::RwLock;

use super::error::{Result, TargetError};
use super::{Change, ExecOutput, ExecutionTarget};

/// Shared handle to an execution target.
///
/// Read-only execs, diffs and pid lookups hold the read side of an internal lock and
/// may run in parallel. [`exec_exclusive`](TargetHandle::exec_exclusive) holds the
/// write side, so a mutating command never overlaps with anything else. Every call is
/// bounded by the handle's timeout.
#[derive(Debug)]
pub struct TargetHandle<T> {
    target: T,
    lock: RwLock<()>,
    timeout: Duration,
}

impl<T: ExecutionTarget> TargetHandle<T> {
    pub fn new(target: T, timeout: Duration) -> Self {
        Self {
            target,
            lock: RwLock::new(()),
            timeout,
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    /// Runs a read-only command inside the target.
    ///
    /// # Errors
    ///
    /// Returns [`TargetError::Timeout`] if the call does not return in time and
    /// [`TargetError::Target`] if the target itself fails.
    pub async fn exec(&self, command: &str) -> Result<ExecOutput> {
        let _guard = self.lock.read().await;
        log::trace!("exec: {command}");
        self.bounded(command, self.timeout, self.target.exec(command))
            .await
    }

    /// Runs a long read-only command, keeping what it printed if it outlives `limit`.
    ///
    /// The result has [`ExecOutput::timed_out`] set in that case. The handle's own
    /// timeout only applies on top of `limit`, to a target that does not return at all.
    ///
    /// # Errors
    ///
    /// Same as [`exec`](TargetHandle::exec).
    pub async fn exec_within(&self, command: &str, limit: Duration) -> Result<ExecOutput> {
        let _guard = self.lock.read().await;
        log::trace!("exec within {limit:?}: {command}");
        self.bounded(
            command,
            limit.saturating_add(self.timeout),
            self.target.exec_within(command, limit),
        )
        .await
    }

    /// Runs a command that mutates the target, e.g. installing a missing tool.
    ///
    /// Waits until every in-flight call finished and blocks new ones until it returns.
    ///
    /// # Errors
    ///
    /// Same as [`exec`](TargetHandle::exec).
    pub async fn exec_exclusive(&self, command: &str) -> Result<ExecOutput> {
        let _guard = self.lock.write().await;
        log::debug!("exclusive exec: {command}");
        self.bounded(command, self.timeout, self.target.exec(command))
            .await
    }

    /// Returns the target's filesystem change log.
    ///
    /// # Errors
    ///
    /// Same as [`exec`](TargetHandle::exec).
    pub async fn diff(&self) -> Result<Vec<Change>> {
        let _guard = self.lock.read().await;
        self.bounded("diff", self.timeout, self.target.diff()).await
    }

    /// Returns the host pid of the target's main process.
    ///
    /// # Errors
    ///
    /// Same as [`exec`](TargetHandle::exec).
    pub async fn inspect_pid(&self) -> Result<Option<u32>> {
        let _guard = self.lock.read().await;
        self.bounded("inspect", self.timeout, self.target.inspect_pid()).await
    }

    async fn bounded<R>(
        &self,
        operation: &str,
        timeout: Duration,
        fut: impl Future<Output = std::result::Result<R, T::Error>>,
    ) -> Result<R> {
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(err)) => Err(TargetError::Target {
                operation: operation.to_owned(),
                source: Box::new(err),
            }),
            Err(_) => Err(TargetError::Timeout {
                operation: operation.to_owned(),
                timeout,
            }),
        }
    }
}
