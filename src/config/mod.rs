//! Analysis configuration.
//!
//! Sources, later ones winning:
//!
//! 1. built-in defaults
//! 2. a JSON file (`--config` or `CREO_USAGE_CONFIG`)
//! 3. `CREO_USAGE_TRACE_WINDOW`, `CREO_USAGE_COLLECTORS`, `CREO_USAGE_LARGE_FILE_THRESHOLD`
//! 4. command line flags, applied by the binary
mod error;

pub use error::{Error, Result};

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorConfig;
use crate::evidence::SourceId;
use crate::evidence::trace::{BackendKind, MAX_TRACE_WINDOW, TraceScenario};
use crate::fsutil;
use crate::platform::Platform;
use crate::reconcile::ExclusionSet;

pub const CONFIG_ENV: &str = "CREO_USAGE_CONFIG";
pub const TRACE_WINDOW_ENV: &str = "CREO_USAGE_TRACE_WINDOW";
pub const COLLECTORS_ENV: &str = "CREO_USAGE_COLLECTORS";
pub const LARGE_FILE_THRESHOLD_ENV: &str = "CREO_USAGE_LARGE_FILE_THRESHOLD";

/// 10 MiB.
pub const DEFAULT_LARGE_FILE_THRESHOLD: u64 = 10 * 1024 * 1024;

/// Conventional system and runtime directories left out of unused-file accounting.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "/proc",
    "/sys",
    "/dev",
    "/run",
    "/var/run",
    "/var/lock",
    "/tmp",
    "/var/log",
    "/var/lib/dpkg",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub exclusion_prefixes: Vec<String>,
    pub large_file_threshold_bytes: u64,
    pub trace_window_seconds: u64,
    pub enabled_collectors: BTreeSet<SourceId>,
    pub enumeration_root: String,
    pub diff_dwell_seconds: u64,
    pub exec_timeout_seconds: u64,
    /// How long the full filesystem listing may take before the analysis proceeds
    /// with the entries streamed so far.
    pub enumeration_timeout_seconds: u64,
    /// Detected from the platform when unset.
    pub trace_backend: Option<BackendKind>,
    pub trace_scenarios: Vec<TraceScenario>,
    pub trace_use_sudo: bool,
    pub install_missing_tools: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exclusion_prefixes: DEFAULT_EXCLUSIONS.iter().map(|p| (*p).to_owned()).collect(),
            large_file_threshold_bytes: DEFAULT_LARGE_FILE_THRESHOLD,
            trace_window_seconds: MAX_TRACE_WINDOW.as_secs(),
            enabled_collectors: SourceId::ALL.into_iter().collect(),
            enumeration_root: "/".to_owned(),
            diff_dwell_seconds: 5,
            exec_timeout_seconds: 30,
            enumeration_timeout_seconds: 600,
            trace_backend: None,
            trace_scenarios: vec![TraceScenario::Runtime, TraceScenario::DynamicLoading],
            trace_use_sudo: false,
            install_missing_tools: false,
        }
    }
}

impl Config {
    /// Loads the configuration file at `path` (defaults if `None`), then applies the
    /// environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an [`Error`] if the file cannot be read or parsed, an override is
    /// malformed, or the result fails validation.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                log::debug!("loading configuration from `{}`", path.display());
                Self::from_reader(fsutil::open_file_reader(path)?).map_err(|source| {
                    Error::Parse {
                        path: path.to_path_buf(),
                        source,
                    }
                })?
            }
            None => Self::default(),
        };
        config.apply_env(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_reader(reader: impl Read) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_reader(reader)
    }

    /// Applies the `CREO_USAGE_*` overrides found through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidEnv`] for a value that does not parse.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup(TRACE_WINDOW_ENV) {
            self.trace_window_seconds = parse_env_u64(TRACE_WINDOW_ENV, &value)?;
        }
        if let Some(value) = lookup(LARGE_FILE_THRESHOLD_ENV) {
            self.large_file_threshold_bytes = parse_env_u64(LARGE_FILE_THRESHOLD_ENV, &value)?;
        }
        if let Some(value) = lookup(COLLECTORS_ENV) {
            self.enabled_collectors =
                parse_collectors(&value).map_err(|reason| Error::InvalidEnv {
                    var: COLLECTORS_ENV.to_owned(),
                    value: value.clone(),
                    reason,
                })?;
        }
        Ok(())
    }

    /// Checks cross-field constraints. An over-long trace window is clamped, not
    /// rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Invalid`] if a value cannot be used.
    pub fn validate(&mut self) -> Result<()> {
        if !self.enumeration_root.starts_with('/') {
            return Err(Error::Invalid(format!(
                "enumeration_root `{}` must be absolute",
                self.enumeration_root
            )));
        }
        if let Some(prefix) = self.exclusion_prefixes.iter().find(|p| !p.starts_with('/')) {
            return Err(Error::Invalid(format!(
                "exclusion prefix `{prefix}` must be absolute"
            )));
        }
        if self.exec_timeout_seconds == 0 {
            return Err(Error::Invalid("exec_timeout_seconds must be positive".into()));
        }
        if self.enumeration_timeout_seconds == 0 {
            return Err(Error::Invalid(
                "enumeration_timeout_seconds must be positive".into(),
            ));
        }
        if self.trace_window_seconds > MAX_TRACE_WINDOW.as_secs() {
            log::warn!(
                "trace window of {}s exceeds the maximum, using {}s",
                self.trace_window_seconds,
                MAX_TRACE_WINDOW.as_secs()
            );
            self.trace_window_seconds = MAX_TRACE_WINDOW.as_secs();
        }
        Ok(())
    }

    pub fn trace_window(&self) -> Duration {
        Duration::from_secs(self.trace_window_seconds).min(MAX_TRACE_WINDOW)
    }

    pub fn diff_dwell(&self) -> Duration {
        Duration::from_secs(self.diff_dwell_seconds)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_timeout_seconds)
    }

    pub fn enumeration_timeout(&self) -> Duration {
        Duration::from_secs(self.enumeration_timeout_seconds)
    }

    pub fn exclusions(&self) -> ExclusionSet {
        ExclusionSet::new(&self.exclusion_prefixes)
    }

    pub fn advisor(&self) -> AdvisorConfig {
        AdvisorConfig {
            large_file_threshold_bytes: self.large_file_threshold_bytes,
        }
    }

    /// The configured trace backend, or the one native to `platform`.
    pub fn resolve_backend(&self, platform: &Platform) -> Option<BackendKind> {
        self.trace_backend.or_else(|| BackendKind::for_os(platform.os))
    }
}

fn parse_env_u64(var: &str, value: &str) -> Result<u64> {
    value.trim().parse().map_err(|err: std::num::ParseIntError| Error::InvalidEnv {
        var: var.to_owned(),
        value: value.to_owned(),
        reason: err.to_string(),
    })
}

/// Parses a comma separated list of source ids, e.g. `open_fd,proc_map`.
pub fn parse_collectors(value: &str) -> std::result::Result<BTreeSet<SourceId>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<SourceId>().map_err(|err| err.to_string()))
        .collect()
}
