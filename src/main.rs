use clap::Parser;

/// Entry point for the Creo Usage container file analysis.
///
/// Logging is controlled by `RUST_LOG`.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=debug creo-usage my-container --collectors open_fd,proc_map
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    creo_usage::run(creo_usage::cli::Args::parse()).await
}
