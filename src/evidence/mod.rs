//! Evidence collectors: independent sources of paths believed to be in use.
//!
//! Every collector runs against the shared [`TargetHandle`] and produces one
//! [`EvidenceSet`]. Collectors never fail an analysis; whatever goes wrong is recorded
//! on the set as a partial failure and the paths recovered so far are kept.
//!
//! | Source     | Mechanism                                         |
//! |------------|---------------------------------------------------|
//! | `open_fd`  | `lsof -F n` snapshot                              |
//! | `proc_fd`  | `readlink` over `/proc/<pid>/fd/*`                |
//! | `proc_map` | pathname column of `/proc/<pid>/maps`             |
//! | `diff`     | write-set between two filesystem change snapshots |
//! | `trace`    | strace / dtrace attached to the main process      |
mod diff;
mod error;
mod open_fd;
mod proc_fd;
mod proc_map;
pub mod trace;

pub use diff::{DiffCollector, write_set};
pub use error::{CollectorError, Result};
pub use open_fd::{OpenFdCollector, parse_lsof};
pub use proc_fd::{ProcFdCollector, parse_fd_links};
pub use proc_map::{ProcMapCollector, parse_maps, parse_pid_listing};
pub use trace::TraceCollector;

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::target::{ExecutionTarget, TargetHandle};
use trace::TraceBackend;

/// Identifies an evidence source. Also the vocabulary of `enabled_collectors`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    OpenFd,
    ProcFd,
    ProcMap,
    Diff,
    Trace,
}

impl SourceId {
    pub const ALL: [SourceId; 5] = [
        SourceId::OpenFd,
        SourceId::ProcFd,
        SourceId::ProcMap,
        SourceId::Diff,
        SourceId::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::OpenFd => "open_fd",
            SourceId::ProcFd => "proc_fd",
            SourceId::ProcMap => "proc_map",
            SourceId::Diff => "diff",
            SourceId::Trace => "trace",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("unknown evidence source `{0}`")]
pub struct UnknownSource(pub String);

impl FromStr for SourceId {
    type Err = UnknownSource;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        SourceId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownSource(s.to_owned()))
    }
}

/// Output of one collector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceSet {
    pub source: SourceId,
    pub paths: BTreeSet<String>,
    pub window_start: SystemTime,
    pub window_end: SystemTime,
    pub partial_failure: bool,
    pub failures: Vec<String>,
}

impl EvidenceSet {
    /// Opens the observation window of `source` now.
    pub fn begin(source: SourceId) -> Self {
        let now = SystemTime::now();
        Self {
            source,
            paths: BTreeSet::new(),
            window_start: now,
            window_end: now,
            partial_failure: false,
            failures: Vec::new(),
        }
    }

    /// An empty set for a source that produced nothing usable.
    pub fn failed(source: SourceId, reason: impl fmt::Display) -> Self {
        let mut set = Self::begin(source);
        set.record_failure(reason);
        set
    }

    /// Marks the set as partial and keeps `reason` for the report.
    pub fn record_failure(&mut self, reason: impl fmt::Display) {
        let reason = reason.to_string();
        log::warn!("{} evidence degraded: {}", self.source, reason);
        self.partial_failure = true;
        self.failures.push(reason);
    }

    /// Closes the observation window, merging collected paths or recording the error.
    pub fn complete(mut self, result: Result<BTreeSet<String>>) -> Self {
        match result {
            Ok(paths) => self.paths.extend(paths),
            Err(err) => self.record_failure(err),
        }
        self.window_end = SystemTime::now();
        log::debug!(
            "{} evidence: {} paths{}",
            self.source,
            self.paths.len(),
            if self.partial_failure { " (partial)" } else { "" }
        );
        self
    }
}

/// A source of in-use path evidence.
pub trait Collector: Send + Sync + 'static {
    fn source(&self) -> SourceId;

    /// Collects evidence from `target` until done or `cancel` fires.
    ///
    /// Implementations never fail: errors are recorded on the returned set.
    fn collect<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> impl Future<Output = EvidenceSet> + Send;
}

/// Keeps absolute paths only and strips the kernel's ` (deleted)` marker.
pub(crate) fn normalize_path(raw: &str) -> Option<String> {
    let path = raw.trim();
    let path = path.strip_suffix(" (deleted)").unwrap_or(path);
    path.starts_with('/').then(|| path.to_owned())
}

/// Runs `fut` unless `cancel` fires first.
pub(crate) async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CollectorError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Slack added on top of each collector's expected run time.
const SAFETY_MARGIN: Duration = Duration::from_secs(5);

/// Runs every enabled collector concurrently and waits for all of them.
///
/// Each collector is its own task bounded by a safety timeout derived from the
/// configuration; a task that panics or overruns yields a failed set for its source.
/// The result is ordered by source.
pub async fn collect_all<T: ExecutionTarget>(
    target: Arc<TargetHandle<T>>,
    config: &Config,
    backend: Option<Arc<dyn TraceBackend>>,
    cancel: &CancellationToken,
) -> Vec<EvidenceSet> {
    let mut tasks = JoinSet::new();
    let mut results = Vec::with_capacity(config.enabled_collectors.len());

    for &source in &config.enabled_collectors {
        let budget = safety_timeout(source, config);
        let target = Arc::clone(&target);
        let cancel = cancel.clone();
        match source {
            SourceId::OpenFd => spawn_collector(
                &mut tasks,
                OpenFdCollector::new(config.install_missing_tools),
                target,
                cancel,
                budget,
            ),
            SourceId::ProcFd => {
                spawn_collector(&mut tasks, ProcFdCollector, target, cancel, budget)
            }
            SourceId::ProcMap => {
                spawn_collector(&mut tasks, ProcMapCollector, target, cancel, budget)
            }
            SourceId::Diff => spawn_collector(
                &mut tasks,
                DiffCollector::new(config.diff_dwell()),
                target,
                cancel,
                budget,
            ),
            SourceId::Trace => match &backend {
                Some(backend) => spawn_collector(
                    &mut tasks,
                    TraceCollector::new(
                        Arc::clone(backend),
                        config.trace_scenarios.clone(),
                        config.trace_window(),
                        config.trace_use_sudo,
                    ),
                    target,
                    cancel,
                    budget,
                ),
                None => results.push(EvidenceSet::failed(source, CollectorError::NoBackend)),
            },
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(set) => results.push(set),
            // The wrapper task only fails if the runtime shuts down under it.
            Err(err) => log::error!("collector wrapper task failed: {err}"),
        }
    }

    results.sort_by_key(|set| set.source);
    results
}

fn spawn_collector<T, C>(
    tasks: &mut JoinSet<EvidenceSet>,
    collector: C,
    target: Arc<TargetHandle<T>>,
    cancel: CancellationToken,
    budget: Duration,
) where
    T: ExecutionTarget,
    C: Collector,
{
    let source = collector.source();
    tasks.spawn(async move {
        let mut inner =
            tokio::spawn(async move { collector.collect(&target, &cancel).await });
        match tokio::time::timeout(budget, &mut inner).await {
            Ok(Ok(set)) => set,
            Ok(Err(err)) => EvidenceSet::failed(source, format!("collector task failed: {err}")),
            Err(_) => {
                inner.abort();
                EvidenceSet::failed(source, CollectorError::Timeout(budget))
            }
        }
    });
}

/// Upper bound on how long `source` may reasonably take under `config`.
fn safety_timeout(source: SourceId, config: &Config) -> Duration {
    let exec = config.exec_timeout();
    let expected = match source {
        // lookup, install, retry
        SourceId::OpenFd => exec.saturating_mul(3),
        SourceId::ProcFd => exec,
        // one listing plus one read per process
        SourceId::ProcMap => exec.saturating_mul(10),
        SourceId::Diff => config.diff_dwell().saturating_add(exec.saturating_mul(2)),
        SourceId::Trace => {
            let window = config.trace_window();
            config
                .trace_scenarios
                .iter()
                .map(|scenario| {
                    scenario
                        .window(window)
                        .saturating_add(trace::STOP_GRACE)
                        .saturating_add(exec)
                })
                .fold(exec, Duration::saturating_add)
        }
    };
    expected.saturating_add(SAFETY_MARGIN)
}
