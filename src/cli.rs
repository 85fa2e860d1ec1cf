use std::collections::BTreeSet;
use std::path::PathBuf;

use clap::Parser;

use crate::config::{self, Config};
use crate::evidence::SourceId;

/// Reports which files of a running container are used and which only take space.
#[derive(Debug, Parser)]
#[command(name = "creo-usage", version)]
pub struct Args {
    /// Container id or name.
    pub container: String,
    /// JSON configuration file. Defaults to `$CREO_USAGE_CONFIG`.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
    /// JSON layer metadata with per-file digests. Without it the image history
    /// from the daemon is used.
    #[arg(short, long)]
    pub layers: Option<PathBuf>,
    /// Print the full report as JSON.
    #[arg(long)]
    pub json: bool,
    /// Comma separated evidence sources, e.g. `open_fd,proc_map`.
    #[arg(long, value_parser = config::parse_collectors)]
    pub collectors: Option<BTreeSet<SourceId>>,
    /// Runtime trace window in seconds.
    #[arg(long)]
    pub trace_window: Option<u64>,
    /// Paths listed per suggestion in the summary.
    #[arg(long, default_value = "10")]
    pub max_paths: usize,
}

impl Args {
    /// Loads the configuration named by the flags or the environment and applies the
    /// flag overrides on top.
    ///
    /// # Errors
    ///
    /// Returns a [`config::Error`] if loading or validation fails.
    pub fn load_config(&self) -> config::Result<Config> {
        let path = self
            .config
            .clone()
            .or_else(|| std::env::var_os(config::CONFIG_ENV).map(PathBuf::from));
        let mut config = Config::load(path.as_deref())?;
        self.apply_overrides(&mut config)?;
        Ok(config)
    }

    fn apply_overrides(&self, config: &mut Config) -> config::Result<()> {
        if let Some(collectors) = &self.collectors {
            config.enabled_collectors = collectors.clone();
        }
        if let Some(window) = self.trace_window {
            config.trace_window_seconds = window;
        }
        config.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_command_is_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::try_parse_from([
            "creo-usage",
            "web-1",
            "--json",
            "--collectors",
            "open_fd, proc_map",
            "--trace-window",
            "90",
        ])
        .unwrap();
        assert_eq!(args.container, "web-1");
        assert!(args.json);
        assert_eq!(
            args.collectors,
            Some([SourceId::OpenFd, SourceId::ProcMap].into_iter().collect())
        );

        let mut config = Config::default();
        args.apply_overrides(&mut config).unwrap();
        assert_eq!(config.enabled_collectors.len(), 2);
        // clamped to the maximum window
        assert_eq!(config.trace_window_seconds, 30);
    }

    #[test]
    fn test_unknown_collector_is_rejected() {
        assert!(Args::try_parse_from(["creo-usage", "web", "--collectors", "lsof"]).is_err());
    }
}
