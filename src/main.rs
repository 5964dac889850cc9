//! CLI entry point: loads configuration, initializes logging, and drives
//! the router to completion.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

mod config;
mod coupler;
mod error;
mod logging;
mod metrics;
mod publisher;
mod router;
mod trace;

use config::Config;
use error::RouterError;
use router::Router;

#[derive(Parser, Debug)]
#[command(name = "nmea_router", about = "NMEA-0183/NMEA-2000 message router")]
struct Cli {
    /// Path to the YAML configuration document.
    #[arg(long)]
    settings: PathBuf,
    /// Base directory relative paths in the configuration (logs, traces,
    /// replay files) are rebased against.
    #[arg(long = "working-dir", default_value = ".")]
    working_dir: PathBuf,
    /// Overrides the configured coupler report-timer interval, in seconds.
    #[arg(long)]
    timer: Option<u64>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("nmea_router: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), RouterError> {
    let config = Config::from_file(&cli.settings)?;
    let _log_guard = logging::init(&config.logging, &cli.working_dir, None).map_err(RouterError::LoggingInit)?;

    info!(settings = %cli.settings.display(), "loaded configuration");

    // Fail fast if the built-in PGN schema won't load, before any coupler
    // tries to use it.
    nmea2k::schema::builtin::standard_registry()?;

    let mut router = Router::new(config, cli.working_dir.clone(), cli.timer);
    router.start().await?;

    let stop = router.stop_handle();
    tokio::spawn(wait_for_sigint(stop));

    router.run().await?;
    Ok(())
}

async fn wait_for_sigint(stop: Arc<AtomicBool>) {
    if tokio::signal::ctrl_c().await.is_err() {
        return;
    }
    info!("received interrupt, stopping");
    stop.store(true, Ordering::Relaxed);

    if tokio::signal::ctrl_c().await.is_ok() {
        error!("received second interrupt, forcing exit");
        std::process::exit(130);
    }
}
