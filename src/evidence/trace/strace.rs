use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use super::{TraceBackend, TraceCommand};
use crate::evidence::normalize_path;

/// Syscalls whose first string argument is the path being looked up.
const PATH_SYSCALLS: &[&str] = &[
    "open",
    "openat",
    "openat2",
    "stat",
    "stat64",
    "lstat",
    "lstat64",
    "newfstatat",
    "fstatat64",
    "statx",
    "access",
    "faccessat",
    "faccessat2",
];

/// `[pid N] name(args` or `N  name(args` as written by `strace -f -o`.
static CALL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\[pid\s+\d+\]|\d+)?\s*(?P<name>[a-z][a-z0-9_]*)\((?P<args>.*)$")
        .expect("invalid strace call regex")
});

static QUOTED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("invalid strace string regex"));

/// Linux backend: `strace` attached to the target's host pid, following forks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Strace;

impl TraceBackend for Strace {
    fn name(&self) -> &'static str {
        "strace"
    }

    fn command(&self, pid: u32, artifacts: &Path) -> TraceCommand {
        let output = artifacts.join("strace.out");
        TraceCommand {
            program: "strace".to_owned(),
            args: vec![
                "-f".to_owned(),
                "-qq".to_owned(),
                "-s".to_owned(),
                "4096".to_owned(),
                "-e".to_owned(),
                "trace=%file".to_owned(),
                "-o".to_owned(),
                output.to_string_lossy().into_owned(),
                "-p".to_owned(),
                pid.to_string(),
            ],
            output,
            files: Vec::new(),
        }
    }

    fn parse(&self, raw: &[u8]) -> BTreeSet<String> {
        parse_strace(raw)
    }
}

/// Extracts looked-up paths from strace output.
///
/// Calls that failed with `ENOENT` are dropped; `<unfinished ...>` lines carry the
/// path and are kept, `<... resumed>` lines carry none and are skipped.
pub fn parse_strace(raw: &[u8]) -> BTreeSet<String> {
    String::from_utf8_lossy(raw)
        .lines()
        .filter(|line| !line.contains("= -1 ENOENT"))
        .filter_map(|line| {
            let call = CALL_RE.captures(line)?;
            if !PATH_SYSCALLS.contains(&&call["name"]) {
                return None;
            }
            let quoted = QUOTED_RE.captures(call.name("args")?.as_str())?;
            normalize_path(&unescape(&quoted[1]))
        })
        .collect()
}

/// Undoes strace's C-style string escaping.
fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'\\' || i + 1 >= bytes.len() {
            out.push(bytes[i]);
            i += 1;
            continue;
        }
        match bytes[i + 1] {
            b'n' => {
                out.push(b'\n');
                i += 2;
            }
            b't' => {
                out.push(b'\t');
                i += 2;
            }
            b'x' => match s.get(i + 2..i + 4).and_then(|h| u8::from_str_radix(h, 16).ok()) {
                Some(b) => {
                    out.push(b);
                    i += 4;
                }
                None => {
                    out.push(b'x');
                    i += 2;
                }
            },
            b'0'..=b'7' => {
                let digits = bytes[i + 1..]
                    .iter()
                    .take(3)
                    .take_while(|b| (b'0'..=b'7').contains(b))
                    .count();
                let value = bytes[i + 1..i + 1 + digits]
                    .iter()
                    .fold(0u32, |acc, d| acc * 8 + u32::from(d - b'0'));
                out.push(u8::try_from(value).unwrap_or(b'?'));
                i += 1 + digits;
            }
            other => {
                out.push(other);
                i += 2;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
