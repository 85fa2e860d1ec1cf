use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use super::{STOP_GRACE, TraceBackend, TraceScenario};
use crate::evidence::{CollectorError, Result};
use crate::fsutil;
use crate::target::{ExecutionTarget, TargetHandle};

/// Time given to the tracer to attach before a scenario's trigger runs.
const ATTACH_DELAY: Duration = Duration::from_millis(300);

const STDERR_FILE: &str = "tracer.stderr";

/// Substrings of tracer or sudo diagnostics that mean the trace lacked privileges.
const DENIED_MARKERS: &[&str] = &[
    "Operation not permitted",
    "a password is required",
    "a terminal is required",
    "must be run as root",
    "requires additional privileges",
];

/// Lifecycle of a [`TraceSession`].
///
/// Transitions only move forward; `Parsed` and `Failed` are terminal and every
/// non-terminal state may fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceState {
    Idle,
    Starting,
    Running,
    Stopping,
    Parsed,
    Failed,
}

impl TraceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TraceState::Parsed | TraceState::Failed)
    }

    pub fn can_transition_to(self, next: TraceState) -> bool {
        use TraceState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Running, Stopping)
                | (Stopping, Parsed)
                | (Idle | Starting | Running | Stopping, Failed)
        )
    }
}

/// Result of a finished session: whatever paths could be recovered, plus the reason
/// the session failed, if it did.
#[derive(Debug)]
pub struct TraceOutcome {
    pub state: TraceState,
    pub paths: BTreeSet<String>,
    pub error: Option<CollectorError>,
}

/// One bounded tracer invocation bound to a host pid.
///
/// Owns the tracer process and a temporary directory for its artifacts. Both are
/// released when the session reaches a terminal state or is dropped.
pub struct TraceSession {
    target_pid: u32,
    backend: Arc<dyn TraceBackend>,
    scenario: TraceScenario,
    use_sudo: bool,
    state: TraceState,
    artifacts: Option<TempDir>,
    output: PathBuf,
    program: String,
    child: Option<Child>,
    /// Process group of the tracer, kept after the leader was reaped.
    group: Option<u32>,
}

impl fmt::Debug for TraceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraceSession")
            .field("target_pid", &self.target_pid)
            .field("backend", &self.backend.name())
            .field("scenario", &self.scenario)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

enum Waited {
    Elapsed,
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

impl TraceSession {
    pub fn new(
        target_pid: u32,
        backend: Arc<dyn TraceBackend>,
        scenario: TraceScenario,
        use_sudo: bool,
    ) -> Self {
        let program = backend.name().to_owned();
        Self {
            target_pid,
            backend,
            scenario,
            use_sudo,
            state: TraceState::Idle,
            artifacts: None,
            output: PathBuf::new(),
            program,
            child: None,
            group: None,
        }
    }

    pub fn state(&self) -> TraceState {
        self.state
    }

    /// Directory holding the tracer's artifacts while the session is live.
    pub fn artifacts_dir(&self) -> Option<&Path> {
        self.artifacts.as_ref().map(TempDir::path)
    }

    fn transition(&mut self, next: TraceState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid trace transition {:?} -> {:?}",
            self.state,
            next
        );
        log::trace!(
            "trace session {} ({}): {:?} -> {:?}",
            self.target_pid,
            self.scenario,
            self.state,
            next
        );
        self.state = next;
    }

    /// Spawns the tracer. On success the session is `Running`.
    ///
    /// # Errors
    ///
    /// Returns [`CollectorError::ToolMissing`] if the tracer (or `sudo`) cannot be
    /// found, and [`CollectorError::Artifact`] or [`CollectorError::Spawn`] for other
    /// setup failures. The session is `Failed` afterwards.
    pub fn start(&mut self) -> Result<()> {
        self.transition(TraceState::Starting);
        match self.spawn() {
            Ok(()) => {
                self.transition(TraceState::Running);
                Ok(())
            }
            Err(err) => Err(self.fail(err)),
        }
    }

    fn spawn(&mut self) -> Result<()> {
        let artifacts = tempfile::Builder::new()
            .prefix("creo-trace-")
            .tempdir()
            .map_err(|source| CollectorError::Artifact {
                path: std::env::temp_dir(),
                source,
            })?;
        let dir = artifacts.path().to_path_buf();
        self.artifacts = Some(artifacts);

        let cmd = self.backend.command(self.target_pid, &dir);
        for (path, contents) in &cmd.files {
            std::fs::write(path, contents).map_err(|source| CollectorError::Artifact {
                path: path.clone(),
                source,
            })?;
        }
        let stderr_path = dir.join(STDERR_FILE);
        let stderr =
            std::fs::File::create(&stderr_path).map_err(|source| CollectorError::Artifact {
                path: stderr_path,
                source,
            })?;

        let mut command = if self.use_sudo {
            let mut sudo = Command::new("sudo");
            sudo.arg("-n").arg(&cmd.program);
            sudo
        } else {
            Command::new(&cmd.program)
        };
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(stderr))
            .process_group(0)
            .kill_on_drop(true);

        let spawned_program = if self.use_sudo { "sudo" } else { cmd.program.as_str() };
        let child = command.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                CollectorError::ToolMissing {
                    tool: spawned_program.to_owned(),
                }
            } else {
                CollectorError::Spawn {
                    program: spawned_program.to_owned(),
                    source,
                }
            }
        })?;
        log::debug!(
            "{} attached to pid {} for scenario {}",
            cmd.program,
            self.target_pid,
            self.scenario
        );

        self.program = cmd.program;
        self.output = cmd.output;
        self.group = child.id();
        self.child = Some(child);
        Ok(())
    }

    /// Stops the tracer and returns the raw output it wrote so far.
    ///
    /// Sends `SIGTERM` and waits up to [`STOP_GRACE`] before killing the tracer.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracer cannot be reaped or its output cannot be read.
    /// The session is `Failed` afterwards.
    pub async fn stop(&mut self) -> Result<Vec<u8>> {
        self.transition(TraceState::Stopping);
        if let Some(mut child) = self.child.take() {
            if let Err(source) = terminate(&mut child, self.group).await {
                return Err(self.fail(CollectorError::Spawn {
                    program: self.program.clone(),
                    source,
                }));
            }
        }

        match fsutil::read_bytes_if_exists(&self.output) {
            Ok(raw) => Ok(raw.unwrap_or_default()),
            Err(err) => Err(self.fail(err.into())),
        }
    }

    /// Parses `raw` with the backend grammar and releases the artifacts.
    pub fn finish(&mut self, raw: &[u8]) -> BTreeSet<String> {
        let paths = self.backend.parse(raw);
        self.transition(TraceState::Parsed);
        self.cleanup();
        paths
    }

    /// Moves the session to `Failed`, killing the tracer and releasing artifacts.
    pub fn fail(&mut self, err: CollectorError) -> CollectorError {
        if let Some(mut child) = self.child.take() {
            kill_group(&mut child, self.group);
        }
        self.transition(TraceState::Failed);
        self.cleanup();
        err
    }

    fn cleanup(&mut self) {
        if let Some(dir) = self.artifacts.take() {
            let path = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                log::warn!("failed to remove trace artifacts `{}`: {}", path.display(), err);
            }
        }
    }

    fn stderr_tail(&self) -> String {
        self.artifacts_dir()
            .and_then(|dir| fsutil::read_bytes_if_exists(dir.join(STDERR_FILE)).ok().flatten())
            .map(|raw| {
                String::from_utf8_lossy(&raw)
                    .lines()
                    .rev()
                    .find(|l| !l.trim().is_empty())
                    .unwrap_or_default()
                    .trim()
                    .to_owned()
            })
            .unwrap_or_default()
    }

    fn exit_error(&self, status: std::io::Result<ExitStatus>) -> CollectorError {
        let stderr = self.stderr_tail();
        if DENIED_MARKERS.iter().any(|m| stderr.contains(m)) {
            return CollectorError::PermissionDenied {
                tool: self.program.clone(),
                detail: stderr,
            };
        }
        match status {
            Ok(status) if status.code() == Some(127) || stderr.contains("command not found") => {
                CollectorError::ToolMissing {
                    tool: self.program.clone(),
                }
            }
            Ok(status) => CollectorError::TracerExited {
                status: status.to_string(),
                stderr,
            },
            Err(source) => CollectorError::Spawn {
                program: self.program.clone(),
                source,
            },
        }
    }

    /// Runs the whole session: start, wait for the scenario's window while running its
    /// trigger, stop, parse.
    ///
    /// Output written before an early tracer exit or a cancellation is still parsed
    /// and returned alongside the error.
    pub async fn run<T: ExecutionTarget>(
        mut self,
        target: &TargetHandle<T>,
        configured_window: Duration,
        cancel: &CancellationToken,
    ) -> TraceOutcome {
        if let Err(err) = self.start() {
            return self.outcome(BTreeSet::new(), Some(err));
        }

        let window = self.scenario.window(configured_window);
        let trigger = self.scenario.trigger();
        let deadline = tokio::time::Instant::now() + window;
        let waited = match self.child.as_mut() {
            Some(child) => {
                let observe = async {
                    tokio::time::sleep(ATTACH_DELAY.min(window)).await;
                    if let Some(trigger) = trigger {
                        match target.exec_exclusive(trigger).await {
                            Ok(out) if !out.success() => {
                                log::debug!("trigger `{trigger}` exited with {}", out.exit_code)
                            }
                            Ok(_) => {}
                            Err(err) => log::warn!("trigger `{trigger}` failed: {err}"),
                        }
                    }
                    tokio::time::sleep_until(deadline).await;
                };
                tokio::select! {
                    status = child.wait() => Waited::Exited(status),
                    _ = observe => Waited::Elapsed,
                    _ = cancel.cancelled() => Waited::Cancelled,
                }
            }
            None => Waited::Elapsed,
        };

        match waited {
            Waited::Elapsed => match self.stop().await {
                Ok(raw) => {
                    let paths = self.finish(&raw);
                    self.outcome(paths, None)
                }
                Err(err) => self.outcome(BTreeSet::new(), Some(err)),
            },
            Waited::Exited(status) => {
                let err = self.exit_error(status);
                self.abort_with(err).await
            }
            Waited::Cancelled => self.abort_with(CollectorError::Cancelled).await,
        }
    }

    /// Stops the tracer, parses what it left behind and fails with `err`.
    async fn abort_with(mut self, err: CollectorError) -> TraceOutcome {
        match self.stop().await {
            Ok(raw) => {
                let paths = self.backend.parse(&raw);
                let err = self.fail(err);
                self.outcome(paths, Some(err))
            }
            Err(stop_err) => {
                log::debug!("could not recover trace output: {stop_err}");
                self.outcome(BTreeSet::new(), Some(err))
            }
        }
    }

    fn outcome(self, paths: BTreeSet<String>, error: Option<CollectorError>) -> TraceOutcome {
        TraceOutcome {
            state: self.state,
            paths,
            error,
        }
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            log::debug!("trace session {} dropped while running", self.target_pid);
            kill_group(&mut child, self.group);
        }
    }
}

/// Sends `signal` to the tracer's process group. The tracer leads its own group, so
/// this also reaches helpers it forked.
fn signal_group(group: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(group) else {
        return;
    };
    // SAFETY: `kill` only sends a signal and takes no pointers.
    if unsafe { libc::kill(-pgid, signal) } != 0 {
        log::debug!(
            "signal {signal} to tracer group {pgid}: {}",
            std::io::Error::last_os_error()
        );
    }
}

fn kill_group(child: &mut Child, group: Option<u32>) {
    if let Some(pgid) = group {
        signal_group(pgid, libc::SIGKILL);
    }
    if let Err(err) = child.start_kill() {
        log::debug!("tracer already gone: {err}");
    }
}

/// `SIGTERM` to the tracer's group, then `SIGKILL` once [`STOP_GRACE`] passed.
async fn terminate(child: &mut Child, group: Option<u32>) -> std::io::Result<ExitStatus> {
    let Some(pid) = group else {
        if child.try_wait()?.is_none() {
            child.start_kill()?;
        }
        return child.wait().await;
    };
    if let Some(status) = child.try_wait()? {
        // leftover helpers of an exited tracer
        signal_group(pid, libc::SIGKILL);
        return Ok(status);
    }
    signal_group(pid, libc::SIGTERM);
    match tokio::time::timeout(STOP_GRACE, child.wait()).await {
        Ok(status) => {
            signal_group(pid, libc::SIGKILL);
            status
        }
        Err(_) => {
            log::warn!("tracer {pid} ignored SIGTERM for {STOP_GRACE:?}, killing its group");
            signal_group(pid, libc::SIGKILL);
            child.wait().await
        }
    }
}
