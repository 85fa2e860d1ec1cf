use std::io::BufRead;

use super::parser::parse_mount_line;
use super::{Error, Result};

/// Filesystem types that expose kernel state rather than image content.
pub const PSEUDO_FS_TYPES: [&str; 10] = [
    "proc",
    "sysfs",
    "devpts",
    "devtmpfs",
    "cgroup",
    "cgroup2",
    "mqueue",
    "debugfs",
    "tracefs",
    "securityfs",
];

/// Returns the mount points of all pseudo filesystems listed in a mountinfo dump.
///
/// The result is sorted and free of duplicates so that the `find` command line built
/// from it is stable between runs. Blank lines are skipped.
///
/// # Errors
///
/// - [`Error::ReadLine`] if the input is not valid UTF-8.
/// - [`Error::Parse`] if a non-blank line is not in mountinfo format.
pub fn pseudo_mount_points(raw: &[u8]) -> Result<Vec<String>> {
    pseudo_mount_points_from_reader(raw)
}

fn pseudo_mount_points_from_reader<R: BufRead>(mut reader: R) -> Result<Vec<String>> {
    let mut line = String::with_capacity(256);
    let mut lineno = 0;
    let mut mount_points = Vec::new();

    while reader
        .read_line(&mut line)
        .map_err(|source| Error::ReadLine {
            line: lineno + 1,
            source,
        })?
        != 0
    {
        lineno += 1;
        if !line.trim().is_empty() {
            let entry = parse_mount_line(line.trim_end())
                .map_err(|source| Error::Parse { line: lineno, source })?;
            if PSEUDO_FS_TYPES.contains(&entry.fs_type) {
                log::trace!(
                    "pseudo filesystem `{}` mounted at {}",
                    entry.fs_type,
                    entry.mount_point
                );
                mount_points.push(entry.mount_point.into_owned());
            }
        }

        line.clear();
    }

    mount_points.sort();
    mount_points.dedup();
    Ok(mount_points)
}
