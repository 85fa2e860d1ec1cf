//! The two entry points of the engine: reconcile a running target into a
//! [`UsagePartition`], then derive suggestions from it.
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::enumerate::{self, EnumerationError};
use crate::evidence::{self, trace::TraceBackend};
use crate::platform;
use crate::reconcile::{self, ReconciliationError, UsagePartition};
use crate::target::{ExecutionTarget, TargetHandle};

pub use crate::advisor::advise;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("enumeration failed: {0}")]
    Enumeration(#[from] EnumerationError),
    #[error("reconciliation failed: {0}")]
    Reconciliation(#[from] ReconciliationError),
    #[error("analysis was cancelled")]
    Cancelled,
}

/// Enumerates the target and collects evidence concurrently, then merges both into a
/// [`UsagePartition`]. The trace backend is taken from `config` or detected from the
/// host platform.
///
/// Collector failures only degrade the result; they show up in
/// [`UsagePartition::degraded_sources`].
///
/// # Errors
///
/// Returns an [`AnalysisError`] if the enumeration fails, the merge hits an internal
/// inconsistency, or `cancel` fires first.
pub async fn enumerate_and_reconcile<T: ExecutionTarget>(
    target: Arc<TargetHandle<T>>,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<UsagePartition, AnalysisError> {
    let backend = if config.enabled_collectors.contains(&evidence::SourceId::Trace) {
        let platform = platform::detect();
        match config.resolve_backend(&platform) {
            Some(kind) => {
                if !platform::tool_available(kind.program()) {
                    log::warn!("`{}` not found on PATH, tracing will fail", kind.program());
                }
                Some(kind.backend())
            }
            None => {
                log::warn!("no trace backend for {:?}", platform.os);
                None
            }
        }
    } else {
        None
    };

    reconcile_with_backend(target, config, backend, cancel).await
}

/// [`enumerate_and_reconcile`] with an explicit trace backend.
///
/// # Errors
///
/// See [`enumerate_and_reconcile`].
pub async fn reconcile_with_backend<T: ExecutionTarget>(
    target: Arc<TargetHandle<T>>,
    config: &Config,
    backend: Option<Arc<dyn TraceBackend>>,
    cancel: &CancellationToken,
) -> Result<UsagePartition, AnalysisError> {
    let started = Instant::now();
    let root = config.enumeration_root.as_str();

    let (enumeration, evidence) = tokio::join!(
        evidence::until_cancelled(
            cancel,
            enumerate::enumerate(&target, root, config.enumeration_timeout())
        ),
        evidence::collect_all(Arc::clone(&target), config, backend, cancel),
    );
    log::trace!("enumeration and collection took {:?}", started.elapsed());

    if cancel.is_cancelled() {
        return Err(AnalysisError::Cancelled);
    }
    let enumeration = enumeration.map_err(|_| AnalysisError::Cancelled)??;

    let mut partition =
        reconcile::reconcile(enumeration.records(), &evidence, &config.exclusions())?;
    partition.skipped_entries = enumeration.skipped_entries();
    partition.enumeration_truncated = enumeration.is_truncated();
    log::debug!(
        "{} used, {} unused, {} excluded files; degraded sources: {:?}",
        partition.used.len(),
        partition.unused.len(),
        partition.excluded.len(),
        partition.degraded_sources
    );
    Ok(partition)
}
