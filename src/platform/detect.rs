use std::path::Path;

use super::checks::{cgroup_is_containerized, find_executable, has_container_markers};
use super::Result;
use crate::fsutil;

/// Operating system family of the machine running the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Linux,
    MacOs,
    Other,
}

impl OsFamily {
    /// Returns the family this binary was compiled for.
    pub fn current() -> Self {
        if cfg!(target_os = "linux") {
            OsFamily::Linux
        } else if cfg!(target_os = "macos") {
            OsFamily::MacOs
        } else {
            OsFamily::Other
        }
    }
}

/// What the analysis host looks like from the tracer's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: OsFamily,
    /// The analysis itself runs inside a container, so host pids reported by the
    /// container runtime are most likely not visible to a tracer.
    pub containerized: bool,
}

/// Detects the operating system and whether this process runs inside a container.
///
/// Individual check failures are logged as warnings and treated as "not detected".
pub fn detect() -> Platform {
    let os = OsFamily::current();
    let containerized = match os {
        OsFamily::Linux => is_containerized_linux(),
        OsFamily::MacOs | OsFamily::Other => has_container_markers(),
    };

    if containerized {
        log::warn!(
            "running inside a container: syscall tracing of the target's host pid will likely fail"
        );
    }

    Platform { os, containerized }
}

fn is_containerized_linux() -> bool {
    match cgroup_says_containerized(Path::new("/proc/self/cgroup")) {
        Ok(true) => true,
        Ok(false) => has_container_markers(),
        Err(err) => {
            log::warn!("cgroup check during platform detection failed: {err}");
            has_container_markers()
        }
    }
}

fn cgroup_says_containerized(path: &Path) -> Result<bool> {
    cgroup_is_containerized(fsutil::open_file_reader(path)?, path)
}

/// Returns true if `tool` can be found on the current `PATH`.
pub fn tool_available(tool: &str) -> bool {
    let search_path = std::env::var_os("PATH");
    find_executable(tool, search_path.as_deref()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_os_family_matches_cfg() {
        let os = OsFamily::current();
        if cfg!(target_os = "linux") {
            assert_eq!(os, OsFamily::Linux);
        } else if cfg!(target_os = "macos") {
            assert_eq!(os, OsFamily::MacOs);
        }
    }

    #[test]
    fn test_detect_reports_current_os() {
        assert_eq!(detect().os, OsFamily::current());
    }

    #[test]
    #[cfg(target_family = "unix")]
    fn test_tool_available_finds_shell() {
        assert!(tool_available("sh"));
        assert!(!tool_available("definitely-not-a-real-tool-name"));
    }
}
