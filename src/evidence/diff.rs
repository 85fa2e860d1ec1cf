use std::collections::{BTreeSet, HashSet};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::{Collector, EvidenceSet, Result, SourceId, normalize_path, until_cancelled};
use crate::target::{Change, ChangeKind, ExecutionTarget, TargetHandle};

/// Compares two snapshots of the target's filesystem change log taken `dwell` apart.
///
/// Reveals what the workload writes during the window, not what it reads.
#[derive(Debug, Clone, Copy)]
pub struct DiffCollector {
    dwell: Duration,
}

impl DiffCollector {
    pub fn new(dwell: Duration) -> Self {
        Self { dwell }
    }

    async fn observe<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> Result<BTreeSet<String>> {
        let before = target.diff().await?;
        until_cancelled(cancel, tokio::time::sleep(self.dwell)).await?;
        let after = target.diff().await?;
        Ok(write_set(&before, &after))
    }
}

impl Collector for DiffCollector {
    fn source(&self) -> SourceId {
        SourceId::Diff
    }

    async fn collect<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> EvidenceSet {
        let evidence = EvidenceSet::begin(SourceId::Diff);
        let result = self.observe(target, cancel).await;
        evidence.complete(result)
    }
}

/// Added or modified entries of `after` that are not already in `before`.
pub fn write_set(before: &[Change], after: &[Change]) -> BTreeSet<String> {
    let seen: HashSet<&Change> = before.iter().collect();
    after
        .iter()
        .filter(|change| matches!(change.kind, ChangeKind::Added | ChangeKind::Modified))
        .filter(|change| !seen.contains(change))
        .filter_map(|change| normalize_path(&change.path))
        .collect()
}
