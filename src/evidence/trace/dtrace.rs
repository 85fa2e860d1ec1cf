use std::collections::BTreeSet;
use std::path::Path;

use super::{TraceBackend, TraceCommand};
use crate::evidence::normalize_path;

/// Prints `probefunc path` for every path lookup of the traced process.
const SCRIPT: &str = r#"syscall::open:entry, syscall::open_nocancel:entry,
syscall::stat64:entry, syscall::lstat64:entry, syscall::access:entry
/pid == $target/
{
    printf("%s %s\n", probefunc, copyinstr(arg0));
}

syscall::openat:entry, syscall::openat_nocancel:entry,
syscall::fstatat64:entry, syscall::faccessat:entry
/pid == $target/
{
    printf("%s %s\n", probefunc, copyinstr(arg1));
}
"#;

const PATH_PROBES: &[&str] = &["open", "stat", "lstat", "access", "faccessat", "fstatat"];

/// macOS backend: a D script attached with `dtrace -p`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Dtrace;

impl TraceBackend for Dtrace {
    fn name(&self) -> &'static str {
        "dtrace"
    }

    fn command(&self, pid: u32, artifacts: &Path) -> TraceCommand {
        let output = artifacts.join("dtrace.out");
        let script = artifacts.join("paths.d");
        TraceCommand {
            program: "dtrace".to_owned(),
            args: vec![
                "-q".to_owned(),
                "-o".to_owned(),
                output.to_string_lossy().into_owned(),
                "-s".to_owned(),
                script.to_string_lossy().into_owned(),
                "-p".to_owned(),
                pid.to_string(),
            ],
            output,
            files: vec![(script, SCRIPT.to_owned())],
        }
    }

    fn parse(&self, raw: &[u8]) -> BTreeSet<String> {
        parse_dtrace(raw)
    }
}

/// Parses `probefunc path` lines, keeping open, stat and access probes.
pub fn parse_dtrace(raw: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter_map(|line| line.trim_start().split_once(' '))
        .filter(|(probe, _)| PATH_PROBES.iter().any(|p| probe.starts_with(p)))
        .filter_map(|(_, path)| normalize_path(path))
        .collect()
}
