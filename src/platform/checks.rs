use std::ffi::OsStr;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::{env, fs};

use super::{Error, Result};

/// Substrings of cgroup paths that container runtimes create.
const RUNTIME_MARKERS: [&str; 4] = ["docker", "kubepods", "containerd", "libpod"];

/// Files container runtimes drop into the root of a container.
const MARKER_FILES: [&str; 2] = ["/.dockerenv", "/run/.containerenv"];

/// Full container ids are 64 hex digits; some runtimes embed a shorter prefix.
const MIN_ID_LEN: usize = 32;

/// Returns true if a `/proc/<pid>/cgroup` listing places the process in a container.
///
/// `origin` only labels errors.
///
/// # Errors
///
/// Returns [`Error::ReadLine`] if the listing cannot be read.
pub fn cgroup_is_containerized<R: BufRead>(reader: R, origin: &Path) -> Result<bool> {
    for line in reader.lines() {
        let line = line.map_err(|source| Error::ReadLine {
            path: origin.to_path_buf(),
            source,
        })?;
        // hierarchy-id:controllers:path
        let path = line.splitn(3, ':').nth(2).unwrap_or_default();
        if RUNTIME_MARKERS.iter().any(|m| path.contains(m))
            || path.split('/').any(looks_like_container_id)
        {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Whether a marker file or the `container` variable set by podman and systemd-nspawn
/// is present.
pub fn has_container_markers() -> bool {
    MARKER_FILES.iter().any(|f| Path::new(f).exists()) || env::var_os("container").is_some()
}

fn looks_like_container_id(segment: &str) -> bool {
    let id = segment
        .rsplit_once('-')
        .map_or(segment, |(_, id)| id)
        .trim_end_matches(".scope");
    id.len() >= MIN_ID_LEN && id.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Looks `name` up in a `PATH`-style list and returns the first regular file found.
/// A name with a slash is taken as a path.
pub fn find_executable(name: &str, search_path: Option<&OsStr>) -> Option<PathBuf> {
    let is_file = |p: &Path| fs::metadata(p).is_ok_and(|m| m.is_file());

    if name.contains('/') {
        let path = PathBuf::from(name);
        return is_file(&path).then_some(path);
    }
    env::split_paths(search_path?)
        .map(|dir| dir.join(name))
        .find(|candidate| is_file(candidate))
}
