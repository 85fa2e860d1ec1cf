use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use super::open_fd::last_stderr_line;
use super::{
    Collector, CollectorError, EvidenceSet, Result, SourceId, normalize_path, until_cancelled,
};
use crate::target::{ExecutionTarget, TargetHandle};

/// Resolves every descriptor symlink of every process. Descriptors that vanish while
/// the loop runs are silently skipped by `readlink`.
const FD_SCAN_COMMAND: &str = "for fd in /proc/[0-9]*/fd/*; do \
t=$(readlink \"$fd\" 2>/dev/null) && printf '%s -> %s\\n' \"$fd\" \"$t\"; done";

/// Scans `/proc/<pid>/fd` symlinks inside the target. Needs nothing beyond a POSIX
/// shell and `readlink`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcFdCollector;

impl ProcFdCollector {
    async fn scan<T: ExecutionTarget>(&self, target: &TargetHandle<T>) -> Result<BTreeSet<String>> {
        let out = target.exec(FD_SCAN_COMMAND).await?;
        // The loop's status is that of its last iteration, so only an empty listing
        // together with a failure status means the scan itself did not work.
        if out.stdout.is_empty() && !out.success() {
            if out.command_not_found() {
                return Err(CollectorError::ToolMissing {
                    tool: "readlink".to_owned(),
                });
            }
            return Err(CollectorError::CommandFailed {
                command: "readlink /proc/*/fd/*".to_owned(),
                exit_code: out.exit_code,
                stderr: last_stderr_line(&out),
            });
        }

        Ok(parse_fd_links(&out.stdout))
    }
}

impl Collector for ProcFdCollector {
    fn source(&self) -> SourceId {
        SourceId::ProcFd
    }

    async fn collect<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> EvidenceSet {
        let evidence = EvidenceSet::begin(SourceId::ProcFd);
        let result = until_cancelled(cancel, self.scan(target))
            .await
            .and_then(|res| res);
        evidence.complete(result)
    }
}

/// Parses `link -> target` lines, keeping absolute targets. Pseudo targets such as
/// `socket:[…]`, `pipe:[…]` or `anon_inode:[eventpoll]` are dropped.
pub fn parse_fd_links(raw: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| line.split_once(" -> "))
        .filter_map(|(_, target)| normalize_path(target))
        .collect()
}
