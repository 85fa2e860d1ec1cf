use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use creo_usage::advisor::{self, AdvisorConfig, LARGE_UNUSED_FILES, PACKAGE_MANAGER_CACHES};
use creo_usage::analysis::{self, AnalysisError};
use creo_usage::config::Config;
use creo_usage::enumerate::EnumerationError;
use creo_usage::evidence::SourceId;
use creo_usage::evidence::trace::{TraceBackend, TraceCommand, TraceScenario};
use creo_usage::reconcile::FileRecord;
use creo_usage::report::Report;
use creo_usage::target::{Change, ChangeKind, ExecOutput, ExecutionTarget, TargetHandle};
use tokio_util::sync::CancellationToken;

const MIB: u64 = 1024 * 1024;

const MOUNTINFO: &str = "\
22 1 0:21 / / rw,relatime - overlay overlay rw,lowerdir=/l
23 22 0:22 / /proc rw,nosuid,nodev,noexec,relatime - proc proc rw
26 22 0:25 / /sys ro,nosuid,nodev,noexec,relatime - sysfs sysfs ro
";

fn listing() -> String {
    [
        format!("{} /usr/bin/app", 2 * MIB),
        "4096 /usr/lib/libc.so.6".to_owned(),
        "812 /etc/app.conf".to_owned(),
        "120 /etc/hosts".to_owned(),
        "64 /var/lib/app/state".to_owned(),
        format!("{} /opt/models/unused.bin", 40 * MIB),
        "900 /var/cache/apk/APKINDEX.tar.gz".to_owned(),
        "33 /tmp/scratch".to_owned(),
        // hardlink listed twice
        "4096 /usr/lib/libc.so.6".to_owned(),
    ]
    .join("\n")
}

/// Container double answering the commands the collectors issue.
#[derive(Debug, Default)]
struct FakeContainer {
    fail_lsof: bool,
    hang_find: bool,
    diffs: Mutex<Vec<Vec<Change>>>,
}

#[derive(Debug, thiserror::Error)]
#[error("unexpected command `{0}`")]
struct Unexpected(String);

impl ExecutionTarget for FakeContainer {
    type Error = Unexpected;

    async fn exec(&self, command: &str) -> Result<ExecOutput, Self::Error> {
        let out = if command == "cat /proc/1/mountinfo" {
            ExecOutput::new(0, MOUNTINFO)
        } else if command.starts_with("find '/'") {
            if self.hang_find {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            ExecOutput::new(0, listing())
        } else if command.starts_with("lsof") {
            if self.fail_lsof {
                ExecOutput::new(127, "").with_stderr("sh: lsof: not found")
            } else {
                ExecOutput::new(0, "p1\nf3\nn/etc/app.conf\nf4\nn/dev/null\n")
            }
        } else if command.starts_with("for fd in") {
            ExecOutput::new(0, "/proc/1/fd/0 -> /dev/null\n/proc/1/fd/5 -> socket:[123]\n")
        } else if command == "ls /proc" {
            ExecOutput::new(0, "1\nself\nmeminfo\n")
        } else if command == "cat /proc/1/maps" {
            ExecOutput::new(
                0,
                "55d0c0000000-55d0c0200000 r-xp 00000000 00:21 42 /usr/bin/app\n\
                 7f0000000000-7f0000100000 r-xp 00000000 00:21 43 /usr/lib/libc.so.6\n\
                 7ffd00000000-7ffd00021000 rw-p 00000000 00:00 0 [stack]\n",
            )
        } else if command == "ldconfig" {
            ExecOutput::new(0, "")
        } else {
            return Err(Unexpected(command.to_owned()));
        };
        Ok(out)
    }

    async fn diff(&self) -> Result<Vec<Change>, Self::Error> {
        let mut diffs = self.diffs.lock().unwrap();
        if diffs.is_empty() {
            return Err(Unexpected("diff".to_owned()));
        }
        Ok(diffs.remove(0))
    }

    async fn inspect_pid(&self) -> Result<Option<u32>, Self::Error> {
        Ok(Some(4242))
    }
}

/// Tracer stand-in that writes a fixed strace-like log and waits to be stopped.
#[derive(Debug)]
struct ScriptTracer;

impl TraceBackend for ScriptTracer {
    fn name(&self) -> &'static str {
        "script"
    }

    fn command(&self, _pid: u32, artifacts: &Path) -> TraceCommand {
        let output = artifacts.join("trace.out");
        TraceCommand {
            program: "sh".to_owned(),
            args: vec![
                "-c".to_owned(),
                "echo /etc/hosts > \"$1\"; exec sleep 30".to_owned(),
                "script-tracer".to_owned(),
                output.to_string_lossy().into_owned(),
            ],
            output,
            files: Vec::new(),
        }
    }

    fn parse(&self, raw: &[u8]) -> BTreeSet<String> {
        String::from_utf8_lossy(raw)
            .lines()
            .map(str::to_owned)
            .collect()
    }
}

fn config() -> Config {
    Config {
        diff_dwell_seconds: 0,
        exec_timeout_seconds: 5,
        trace_window_seconds: 1,
        trace_scenarios: vec![TraceScenario::Runtime],
        ..Config::default()
    }
}

fn container(fail_lsof: bool) -> Arc<TargetHandle<FakeContainer>> {
    container_with(FakeContainer {
        fail_lsof,
        ..FakeContainer::default()
    })
}

fn container_with(target: FakeContainer) -> Arc<TargetHandle<FakeContainer>> {
    let target = FakeContainer {
        diffs: Mutex::new(vec![
            vec![Change::new("/var/lib/app", ChangeKind::Modified)],
            vec![
                Change::new("/var/lib/app", ChangeKind::Modified),
                Change::new("/var/lib/app/state", ChangeKind::Added),
            ],
        ]),
        ..target
    };
    Arc::new(TargetHandle::new(target, Duration::from_secs(5)))
}

#[tokio::test]
async fn test_full_pipeline() {
    let config = config();
    let partition = analysis::reconcile_with_backend(
        container(false),
        &config,
        Some(Arc::new(ScriptTracer)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    let used: Vec<&str> = partition.used_paths().collect();
    assert_eq!(
        used,
        vec![
            "/etc/app.conf",
            "/etc/hosts",
            "/usr/bin/app",
            "/usr/lib/libc.so.6",
            "/var/lib/app/state",
        ]
    );
    assert_eq!(
        partition.unused.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
        vec!["/opt/models/unused.bin", "/var/cache/apk/APKINDEX.tar.gz"]
    );
    assert_eq!(
        partition.excluded.iter().collect::<Vec<_>>(),
        vec![&FileRecord::new("/tmp/scratch", 33)]
    );
    assert!(partition.degraded_sources.is_empty());
    assert!(!partition.enumeration_truncated);
    assert_eq!(
        partition.total_size,
        partition.used_size + partition.unused_size + partition.excluded_size
    );
    assert_eq!(partition.file_count(), 8);
    assert!(partition.unmatched_evidence.contains("/dev/null"));

    let suggestions = advisor::advise(&partition, None, &AdvisorConfig::default());
    let categories: Vec<&str> = suggestions.iter().map(|s| s.category.as_str()).collect();
    assert_eq!(categories, vec![LARGE_UNUSED_FILES, PACKAGE_MANAGER_CACHES]);
    assert_eq!(suggestions[0].potential_savings, 40 * MIB);

    let mut out = Vec::new();
    Report::new("fake", &partition, &suggestions, None)
        .write_summary(&mut out, 5)
        .unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.contains("[1] large unused files (save up to 40.0 MB)"));
    assert!(!text.contains("Incomplete evidence"));
}

#[tokio::test]
async fn test_missing_tool_degrades_one_source() {
    let config = config();
    let partition = analysis::reconcile_with_backend(
        container(true),
        &config,
        Some(Arc::new(ScriptTracer)),
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(
        partition.degraded_sources,
        [SourceId::OpenFd].into_iter().collect()
    );
    // only lsof saw the config file
    assert!(partition.unused.contains(&FileRecord::new("/etc/app.conf", 812)));
    assert!(partition.used.contains(&FileRecord::new("/usr/bin/app", 2 * MIB)));
}

#[tokio::test]
async fn test_cancellation_stops_the_analysis() {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let config = Config {
        trace_window_seconds: 30,
        ..config()
    };
    let started = std::time::Instant::now();
    let err = analysis::reconcile_with_backend(
        container(false),
        &config,
        Some(Arc::new(ScriptTracer)),
        &cancel,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, AnalysisError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_hanging_listing_is_bounded() {
    let config = Config {
        enumeration_timeout_seconds: 1,
        ..config()
    };
    let started = std::time::Instant::now();
    let err = analysis::reconcile_with_backend(
        container_with(FakeContainer {
            hang_find: true,
            ..FakeContainer::default()
        }),
        &config,
        None,
        &CancellationToken::new(),
    )
    .await
    .unwrap_err();

    assert!(matches!(
        err,
        AnalysisError::Enumeration(EnumerationError::TimedOut { .. })
    ));
    // ended by the listing limit, not by the hang
    assert!(started.elapsed() < Duration::from_secs(10));
}
