//! Syscall tracing of the target's main process.
//!
//! A [`TraceBackend`] only knows how to start its tracer and how to read the tracer's
//! output; [`TraceSession`] owns the process lifecycle shared by all backends.
mod dtrace;
mod scenario;
mod session;
mod strace;

pub use dtrace::{Dtrace, parse_dtrace};
pub use scenario::{DYNAMIC_LOADING_WINDOW, MAX_TRACE_WINDOW, TraceScenario};
pub use session::{TraceOutcome, TraceSession, TraceState};
pub use strace::{Strace, parse_strace};

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{Collector, CollectorError, EvidenceSet, SourceId, until_cancelled};
use crate::platform::OsFamily;
use crate::target::{ExecutionTarget, TargetHandle};

/// Time a tracer gets to exit after `SIGTERM` before it is killed.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// How to launch a tracer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceCommand {
    pub program: String,
    pub args: Vec<String>,
    /// File the tracer writes its trace to.
    pub output: PathBuf,
    /// Files to write into the artifact directory before spawning, e.g. a D script.
    pub files: Vec<(PathBuf, String)>,
}

/// A platform-specific tracer.
pub trait TraceBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Command attaching the tracer to `pid`, keeping all artifacts under `artifacts`.
    fn command(&self, pid: u32, artifacts: &Path) -> TraceCommand;

    /// Extracts the accessed paths from the tracer's output.
    fn parse(&self, raw: &[u8]) -> BTreeSet<String>;
}

/// The tracers this crate knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Strace,
    Dtrace,
}

impl BackendKind {
    /// The natural tracer of `os`, if there is one.
    pub fn for_os(os: OsFamily) -> Option<Self> {
        match os {
            OsFamily::Linux => Some(BackendKind::Strace),
            OsFamily::MacOs => Some(BackendKind::Dtrace),
            OsFamily::Other => None,
        }
    }

    pub fn program(&self) -> &'static str {
        match self {
            BackendKind::Strace => "strace",
            BackendKind::Dtrace => "dtrace",
        }
    }

    pub fn backend(&self) -> Arc<dyn TraceBackend> {
        match self {
            BackendKind::Strace => Arc::new(Strace),
            BackendKind::Dtrace => Arc::new(Dtrace),
        }
    }
}

/// Runs one [`TraceSession`] per configured scenario against the target's main pid.
#[derive(Debug, Clone)]
pub struct TraceCollector {
    backend: Arc<dyn TraceBackend>,
    scenarios: Vec<TraceScenario>,
    window: Duration,
    use_sudo: bool,
}

impl TraceCollector {
    pub fn new(
        backend: Arc<dyn TraceBackend>,
        scenarios: Vec<TraceScenario>,
        window: Duration,
        use_sudo: bool,
    ) -> Self {
        Self {
            backend,
            scenarios,
            window,
            use_sudo,
        }
    }
}

impl Collector for TraceCollector {
    fn source(&self) -> SourceId {
        SourceId::Trace
    }

    async fn collect<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> EvidenceSet {
        let mut evidence = EvidenceSet::begin(SourceId::Trace);

        let pid = match until_cancelled(cancel, target.inspect_pid()).await {
            Ok(Ok(Some(pid))) => pid,
            Ok(Ok(None)) => return evidence.complete(Err(CollectorError::NotRunning)),
            Ok(Err(err)) => return evidence.complete(Err(err.into())),
            Err(err) => return evidence.complete(Err(err)),
        };

        for &scenario in &self.scenarios {
            if cancel.is_cancelled() {
                evidence.record_failure(CollectorError::Cancelled);
                break;
            }
            let outcome = TraceSession::new(pid, Arc::clone(&self.backend), scenario, self.use_sudo)
                .run(target, self.window, cancel)
                .await;
            log::debug!(
                "{} trace of pid {} ({}): {} paths, {:?}",
                self.backend.name(),
                pid,
                scenario,
                outcome.paths.len(),
                outcome.state
            );
            evidence.paths.extend(outcome.paths);
            if let Some(err) = outcome.error {
                evidence.record_failure(format!("{scenario}: {err}"));
            }
        }

        evidence.complete(Ok(BTreeSet::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::testing::ScriptedTarget;

    #[test]
    fn test_backend_for_os() {
        assert_eq!(BackendKind::for_os(OsFamily::Linux), Some(BackendKind::Strace));
        assert_eq!(BackendKind::for_os(OsFamily::MacOs), Some(BackendKind::Dtrace));
        assert_eq!(BackendKind::for_os(OsFamily::Other), None);
        assert_eq!(BackendKind::Dtrace.backend().name(), "dtrace");
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"strace\"").unwrap();
        assert_eq!(kind, BackendKind::Strace);
    }

    #[tokio::test]
    async fn test_stopped_target_is_partial() {
        let target = TargetHandle::new(ScriptedTarget::default(), Duration::from_secs(1));
        let collector = TraceCollector::new(
            BackendKind::Strace.backend(),
            vec![TraceScenario::Runtime],
            Duration::from_secs(1),
            false,
        );
        let set = collector.collect(&target, &CancellationToken::new()).await;

        assert!(set.partial_failure);
        assert_eq!(set.failures, vec!["target has no running main process".to_owned()]);
    }

    #[derive(Debug)]
    struct MissingTracer;

    impl TraceBackend for MissingTracer {
        fn name(&self) -> &'static str {
            "no-such-tracer"
        }

        fn command(&self, pid: u32, artifacts: &Path) -> TraceCommand {
            TraceCommand {
                program: "no-such-tracer".to_owned(),
                args: vec![pid.to_string()],
                output: artifacts.join("out"),
                files: Vec::new(),
            }
        }

        fn parse(&self, _raw: &[u8]) -> BTreeSet<String> {
            BTreeSet::new()
        }
    }

    #[tokio::test]
    async fn test_missing_tracer_fails_every_scenario() {
        let target = TargetHandle::new(
            ScriptedTarget::default().with_pid(4242),
            Duration::from_secs(1),
        );
        let collector = TraceCollector::new(
            Arc::new(MissingTracer),
            vec![TraceScenario::Runtime, TraceScenario::DynamicLoading],
            Duration::from_secs(1),
            false,
        );
        let set = collector.collect(&target, &CancellationToken::new()).await;

        assert!(set.partial_failure);
        assert_eq!(
            set.failures,
            vec![
                "runtime: `no-such-tracer` is not available".to_owned(),
                "dynamic_loading: `no-such-tracer` is not available".to_owned(),
            ]
        );
    }
}
