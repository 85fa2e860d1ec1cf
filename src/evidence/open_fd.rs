use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use super::{
    Collector, CollectorError, EvidenceSet, Result, SourceId, normalize_path, until_cancelled,
};
use crate::target::{ExecOutput, ExecutionTarget, TargetHandle};

const LSOF_COMMAND: &str = "lsof -n -F n";

/// Tries the package managers found in common base images, in order.
const INSTALL_LSOF: &str = "if command -v apk >/dev/null 2>&1; then apk add --no-cache lsof; \
elif command -v apt-get >/dev/null 2>&1; then apt-get update -qq && apt-get install -y -qq lsof; \
elif command -v yum >/dev/null 2>&1; then yum install -y -q lsof; \
elif command -v dnf >/dev/null 2>&1; then dnf install -y -q lsof; \
else exit 127; fi";

/// Snapshot of the files held open by any process in the target, taken with `lsof`.
#[derive(Debug, Clone, Default)]
pub struct OpenFdCollector {
    install_missing_tools: bool,
}

impl OpenFdCollector {
    pub fn new(install_missing_tools: bool) -> Self {
        Self {
            install_missing_tools,
        }
    }

    async fn snapshot<T: ExecutionTarget>(&self, target: &TargetHandle<T>) -> Result<BTreeSet<String>> {
        let mut out = target.exec(LSOF_COMMAND).await?;

        if out.command_not_found() && self.install_missing_tools {
            log::info!("lsof missing in target, trying to install it");
            let install = target.exec_exclusive(INSTALL_LSOF).await?;
            if !install.success() {
                return Err(CollectorError::CommandFailed {
                    command: "install lsof".to_owned(),
                    exit_code: install.exit_code,
                    stderr: last_stderr_line(&install),
                });
            }
            out = target.exec(LSOF_COMMAND).await?;
        }

        if out.command_not_found() {
            return Err(CollectorError::ToolMissing {
                tool: "lsof".to_owned(),
            });
        }
        // lsof exits with 1 whenever it could not inspect some process, even though
        // the rest of its listing is fine.
        if !out.success() && (out.exit_code != 1 || out.stdout.is_empty()) {
            return Err(CollectorError::CommandFailed {
                command: LSOF_COMMAND.to_owned(),
                exit_code: out.exit_code,
                stderr: last_stderr_line(&out),
            });
        }

        Ok(parse_lsof(&out.stdout))
    }
}

impl Collector for OpenFdCollector {
    fn source(&self) -> SourceId {
        SourceId::OpenFd
    }

    async fn collect<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> EvidenceSet {
        let evidence = EvidenceSet::begin(SourceId::OpenFd);
        let result = until_cancelled(cancel, self.snapshot(target))
            .await
            .and_then(|res| res);
        evidence.complete(result)
    }
}

pub(super) fn last_stderr_line(out: &ExecOutput) -> String {
    out.stderr_lines().pop().unwrap_or_default()
}

/// Parses `lsof -F n` output. Only `n` fields naming an absolute path are kept; the
/// `p` (pid) and `f` (descriptor) fields are ignored.
pub fn parse_lsof(raw: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| line.strip_prefix('n'))
        .filter_map(normalize_path)
        .collect()
}
