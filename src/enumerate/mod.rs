//! Static listing of every regular file in the target, with its size.
//!
//! One `find … -exec stat` runs inside the target. Its output is kept as a single
//! buffer and parsed lazily each time [`Enumeration::records`] is called, so the
//! listing can be walked more than once without holding parsed records for the whole
//! tree.
//!
//! The listing runs under its own time limit. If `find` overruns it, the lines
//! streamed so far are kept and the enumeration is marked truncated.
mod error;
mod parser;

pub use error::{EnumerationError, ParseError, Result};
pub use parser::{parse_stat_line, shell_quote};

use std::time::Duration;

use crate::mountinfo;
use crate::reconcile::FileRecord;
use crate::target::{ExecutionTarget, TargetHandle};

/// Kernel filesystems that are never walked, whatever mountinfo says.
pub const ALWAYS_PRUNED: [&str; 3] = ["/proc", "/sys", "/dev"];

const MOUNTINFO_COMMAND: &str = "cat /proc/1/mountinfo";

/// Captured listing of the target's files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    root: String,
    listing: String,
    skipped: usize,
    truncated: bool,
}

impl Enumeration {
    pub fn from_listing(root: impl Into<String>, listing: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            listing: listing.into(),
            skipped: 0,
            truncated: false,
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// Entries `find` or `stat` could not read.
    pub fn skipped_entries(&self) -> usize {
        self.skipped
    }

    /// The listing command overran its time limit; files it had not reached yet are
    /// missing from [`records`](Enumeration::records).
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// A fresh iterator over the listing. Unparsable lines are logged and skipped.
    pub fn records(&self) -> impl Iterator<Item = FileRecord> + '_ {
        self.listing
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.is_empty())
            .filter_map(|(idx, line)| match parse_stat_line(line) {
                Ok(record) => Some(record),
                Err(err) => {
                    log::debug!("skipping listing line {}: {}", idx + 1, err);
                    None
                }
            })
    }
}

/// Builds the listing command for `root`, pruning `pruned` directories.
pub fn find_command(root: &str, pruned: &[String]) -> String {
    let mut cmd = format!("find {}", shell_quote(root));
    if !pruned.is_empty() {
        let paths: Vec<String> = pruned
            .iter()
            .map(|p| format!("-path {}", shell_quote(p)))
            .collect();
        cmd.push_str(&format!(" \\( {} \\) -prune -o", paths.join(" -o ")));
    }
    cmd.push_str(" -type f -exec stat -c '%s %n' {} +");
    cmd
}

/// Mount points to prune: the fixed kernel roots plus every pseudo filesystem the
/// target's init process sees. Failing to read mountinfo only costs the extras.
pub async fn pruned_paths<T: ExecutionTarget>(target: &TargetHandle<T>, root: &str) -> Vec<String> {
    let mut pruned: Vec<String> = ALWAYS_PRUNED.iter().map(|p| (*p).to_owned()).collect();

    match target.exec(MOUNTINFO_COMMAND).await {
        Ok(out) if out.success() => match mountinfo::pseudo_mount_points(&out.stdout) {
            Ok(points) => pruned.extend(points),
            Err(err) => log::warn!("ignoring unparsable mountinfo of target: {err}"),
        },
        Ok(out) => log::warn!(
            "could not read mountinfo of target (exit code {})",
            out.exit_code
        ),
        Err(err) => log::warn!("could not read mountinfo of target: {err}"),
    }

    pruned.retain(|p| p != root && p != "/");
    pruned.sort();
    pruned.dedup();
    pruned
}

/// Lists every regular file below `root` inside the target, giving the listing
/// `limit` to finish.
///
/// Entries that cannot be read are skipped and logged. A listing that overruns
/// `limit` is cut after its last complete line and returned truncated.
///
/// # Errors
///
/// Returns an [`EnumerationError`] if the command cannot be run, `find` is missing,
/// or the listing failed or timed out without producing a single record.
pub async fn enumerate<T: ExecutionTarget>(
    target: &TargetHandle<T>,
    root: &str,
    limit: Duration,
) -> Result<Enumeration> {
    let pruned = pruned_paths(target, root).await;
    log::debug!("enumerating `{root}`, pruning {pruned:?}");

    let out = target
        .exec_within(&find_command(root, &pruned), limit)
        .await?;
    if !out.timed_out && out.command_not_found() {
        return Err(EnumerationError::ToolMissing {
            tool: "find".to_owned(),
        });
    }

    let stderr = out.stderr_lines();
    for line in &stderr {
        log::debug!("skipped entry: {line}");
    }

    let mut listing = String::from_utf8_lossy(&out.stdout).into_owned();
    if out.timed_out {
        // the line being written when time ran out may be cut anywhere
        let complete = listing.rfind('\n').map_or(0, |pos| pos + 1);
        listing.truncate(complete);
    }
    let enumeration = Enumeration {
        root: root.to_owned(),
        listing,
        skipped: stderr.len(),
        truncated: out.timed_out,
    };

    let empty = enumeration.records().next().is_none();
    if out.timed_out && empty {
        return Err(EnumerationError::TimedOut {
            root: root.to_owned(),
            limit,
        });
    }
    if !out.success() && !out.timed_out && empty {
        return Err(EnumerationError::RootInaccessible {
            root: root.to_owned(),
            exit_code: out.exit_code,
            stderr: stderr.last().cloned().unwrap_or_default(),
        });
    }
    if out.timed_out {
        log::warn!(
            "listing `{root}` did not finish within {limit:?}; continuing with {} entries",
            enumeration.records().count()
        );
    }
    if enumeration.skipped > 0 {
        log::warn!(
            "{} entries below `{root}` could not be read",
            enumeration.skipped
        );
    }
    Ok(enumeration)
}
