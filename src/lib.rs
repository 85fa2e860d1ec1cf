/// Creo Usage: finds out which files of a running container are actually used.
///
/// A static listing of the container's files is reconciled with several independent
/// sources of usage evidence (open descriptors, process fds and memory maps,
/// filesystem changes, syscall tracing) into a used/unused partition, from which
/// image-size suggestions are derived.
pub mod advisor;
pub mod analysis;
pub mod cli;
pub mod config;
pub mod enumerate;
pub mod error;
pub mod evidence;
pub mod fsutil;
pub mod mountinfo;
pub mod platform;
pub mod reconcile;
pub mod report;
pub mod target;

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::ResultOkLogExt;
use crate::target::TargetHandle;
use crate::target::docker::{ContainerRef, DockerTarget, UnixClient};

/// Environment variable naming the Docker daemon, e.g. `unix:///var/run/docker.sock`.
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// Runs one analysis of the container named in `args` and prints the report.
///
/// # Errors
///
/// Possible errors include:
/// - An invalid configuration file or override.
/// - An invalid container reference or `DOCKER_HOST`.
/// - The container's files cannot be listed.
/// - Ctrl-C before the analysis finished.
pub async fn run(args: cli::Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = args.load_config()?;
    log::debug!("configuration: {config:?}");

    let container = ContainerRef::new(&args.container)?;
    let client = UnixClient::from_docker_host(std::env::var(DOCKER_HOST_ENV).ok().as_deref())?;
    log::debug!("using docker socket `{}`", client.socket_path().display());
    let docker = DockerTarget::new(client, container);
    let target = Arc::new(TargetHandle::new(docker, config.exec_timeout()));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::warn!("interrupted, stopping collectors");
                cancel.cancel();
            }
        });
    }

    let partition =
        analysis::enumerate_and_reconcile(Arc::clone(&target), &config, &cancel).await?;

    let layers = match &args.layers {
        Some(path) => Some(advisor::load_layer_info(path)?),
        None => target
            .target()
            .image_history()
            .await
            .ok_warn("image history unavailable"),
    };
    let suggestions = analysis::advise(&partition, layers.as_ref(), &config.advisor());

    let report = report::Report::new(&args.container, &partition, &suggestions, layers.as_ref());
    let mut stdout = std::io::stdout().lock();
    if args.json {
        report.write_json(&mut stdout)?;
        writeln!(stdout)?;
    } else {
        report.write_summary(&mut stdout, args.max_paths)?;
    }
    Ok(())
}
