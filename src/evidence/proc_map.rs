use std::collections::BTreeSet;

use tokio_util::sync::CancellationToken;

use super::open_fd::last_stderr_line;
use super::{CollectorError, Collector, EvidenceSet, SourceId, normalize_path};
use crate::target::{ExecutionTarget, TargetHandle};

const LIST_PROCESSES: &str = "ls /proc";

/// Reads the memory maps of every process in the target, one process at a time.
///
/// Catches shared libraries and other mapped files that are no longer held open by
/// a descriptor.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMapCollector;

impl ProcMapCollector {
    async fn scan<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
        evidence: &mut EvidenceSet,
    ) {
        let listing = match target.exec(LIST_PROCESSES).await {
            Ok(out) if out.success() => out,
            Ok(out) => {
                evidence.record_failure(CollectorError::CommandFailed {
                    command: LIST_PROCESSES.to_owned(),
                    exit_code: out.exit_code,
                    stderr: last_stderr_line(&out),
                });
                return;
            }
            Err(err) => {
                evidence.record_failure(err);
                return;
            }
        };

        let pids = parse_pid_listing(&listing.stdout);
        log::debug!("reading memory maps of {} processes", pids.len());
        for pid in pids {
            if cancel.is_cancelled() {
                evidence.record_failure(CollectorError::Cancelled);
                return;
            }

            let command = format!("cat /proc/{pid}/maps");
            match target.exec(&command).await {
                Ok(out) if out.success() => evidence.paths.extend(parse_maps(&out.stdout)),
                Ok(out) if out.stderr_lines().iter().any(|l| l.contains("No such file")) => {
                    log::debug!("process {pid} exited before its maps could be read");
                }
                Ok(out) => evidence.record_failure(CollectorError::CommandFailed {
                    command,
                    exit_code: out.exit_code,
                    stderr: last_stderr_line(&out),
                }),
                Err(err) => evidence.record_failure(err),
            }
        }
    }
}

impl Collector for ProcMapCollector {
    fn source(&self) -> SourceId {
        SourceId::ProcMap
    }

    async fn collect<T: ExecutionTarget>(
        &self,
        target: &TargetHandle<T>,
        cancel: &CancellationToken,
    ) -> EvidenceSet {
        let mut evidence = EvidenceSet::begin(SourceId::ProcMap);
        self.scan(target, cancel, &mut evidence).await;
        evidence.complete(Ok(BTreeSet::new()))
    }
}

/// Extracts the numeric entries of a `/proc` listing, i.e. the process table.
pub fn parse_pid_listing(raw: &[u8]) -> Vec<u32> {
    let mut pids: Vec<u32> = String::from_utf8_lossy(raw)
        .split_whitespace()
        .filter_map(|entry| entry.parse().ok())
        .collect();
    pids.sort_unstable();
    pids.dedup();
    pids
}

/// Parses `/proc/<pid>/maps`, keeping the pathname column of file-backed mappings.
///
/// Format: `address perms offset dev inode pathname`. The pathname may contain spaces
/// and is absent for anonymous mappings.
pub fn parse_maps(raw: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(pathname)
        .filter_map(normalize_path)
        .collect()
}

fn pathname(line: &str) -> Option<&str> {
    let mut rest = line.trim_start();
    for _ in 0..5 {
        let end = rest.find(char::is_whitespace)?;
        rest = rest[end..].trim_start();
    }
    let rest = rest.trim_end();
    (!rest.is_empty()).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::ExecOutput;
    use crate::target::testing::ScriptedTarget;
    use std::time::Duration;

    const MAPS_FIXTURE: &str = "\
55d0c7a00000-55d0c7a2e000 r--p 00000000 00:2f 1835117                    /usr/bin/python3.11
55d0c7a2e000-55d0c7d1c000 r-xp 0002e000 00:2f 1835117                    /usr/bin/python3.11
55d0c9368000-55d0c94a1000 rw-p 00000000 00:00 0                          [heap]
7f3a1c000000-7f3a1c021000 rw-p 00000000 00:00 0
7f3a1e2c0000-7f3a1e2e8000 r--p 00000000 00:2f 1840211                    /usr/lib/x86_64-linux-gnu/libc.so.6
7f3a1e400000-7f3a1e401000 r--p 00000000 00:2f 1902210                    /opt/app/data/My Model.bin
7f3a1e500000-7f3a1e501000 rw-s 00000000 00:01 4096                       /memfd:shm (deleted)
7f3a1e600000-7f3a1e601000 r--p 00000000 00:2f 1902299                    /opt/app/old.so (deleted)
7ffd4b3e9000-7ffd4b3ed000 r--p 00000000 00:00 0                          [vvar]
7ffd4b3ed000-7ffd4b3ef000 r-xp 00000000 00:00 0                          [vdso]
";

    #[test]
    fn test_parse_maps_fixture() {
        let paths = parse_maps(MAPS_FIXTURE.as_bytes());
        let expected: BTreeSet<String> = [
            "/memfd:shm",
            "/opt/app/data/My Model.bin",
            "/opt/app/old.so",
            "/usr/bin/python3.11",
            "/usr/lib/x86_64-linux-gnu/libc.so.6",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(paths, expected);
    }

    #[test]
    fn test_parse_pid_listing() {
        let listing = b"1\n12\nacpi\nbuddyinfo\ncmdline\n7\nself\nthread-self\n12\n";
        assert_eq!(parse_pid_listing(listing), vec![1, 7, 12]);
    }

    fn target() -> ScriptedTarget {
        ScriptedTarget::default()
            .on("ls /proc", ExecOutput::new(0, "1\n8\n9\nself\nversion\n"))
            .on(
                "cat /proc/1/maps",
                ExecOutput::new(0, MAPS_FIXTURE.lines().next().unwrap()),
            )
            .on(
                "cat /proc/8/maps",
                ExecOutput::new(1, "").with_stderr("cat: /proc/8/maps: No such file or directory"),
            )
            .on(
                "cat /proc/9/maps",
                ExecOutput::new(1, "").with_stderr("cat: /proc/9/maps: Permission denied"),
            )
    }

    #[tokio::test]
    async fn test_vanished_process_is_not_a_failure() {
        let handle = TargetHandle::new(target(), Duration::from_secs(1));
        let set = ProcMapCollector
            .collect(&handle, &CancellationToken::new())
            .await;

        assert_eq!(
            set.paths,
            BTreeSet::from(["/usr/bin/python3.11".to_owned()])
        );
        // pid 9 was unreadable, pid 8 merely gone
        assert!(set.partial_failure);
        assert_eq!(set.failures.len(), 1);
        assert!(set.failures[0].contains("Permission denied"));
    }

    #[tokio::test]
    async fn test_cancel_stops_between_processes() {
        let handle = TargetHandle::new(target(), Duration::from_secs(1));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let set = ProcMapCollector.collect(&handle, &cancel).await;

        assert!(set.paths.is_empty());
        assert_eq!(handle.target().calls(), vec![LIST_PROCESSES]);
        assert_eq!(set.failures, vec!["collection was cancelled".to_owned()]);
    }

    #[tokio::test]
    async fn test_unlistable_proc() {
        let handle = TargetHandle::new(
            ScriptedTarget::default().on("ls /proc", ExecOutput::new(2, "")),
            Duration::from_secs(1),
        );
        let set = ProcMapCollector
            .collect(&handle, &CancellationToken::new())
            .await;
        assert!(set.partial_failure);
        assert!(set.paths.is_empty());
    }
}
