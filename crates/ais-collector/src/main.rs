//! AIS Collector - Main entry point

use std::path::PathBuf;
use std::sync::Arc;

use ais_collector::config::CollectorConfig;
use ais_collector::correction::DimensionCorrector;
use ais_collector::feed::{MessageKind, StreamConnector};
use ais_collector::pipeline::IngestPipeline;
use ais_collector::startup::{self, Bootstrap};
use ais_common::logging::{init_logging, LogConfig, LogLevel};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "ais-collector")]
#[command(about = "Collects AIS vessel traffic for a region into PostgreSQL", long_about = None)]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true, env = "AIS_VERBOSE")]
    verbose: bool,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Commands {
    /// Collect static data and position reports (default)
    Collect,

    /// Correct registry length/width from static data dimensions
    CorrectDimensions,
}

/// Command-line values that take precedence over the environment
#[derive(Args, Debug)]
struct Overrides {
    /// GeoJSON file with the region boundary polygon(s)
    #[arg(long, global = true, value_name = "PATH")]
    region_boundary: Option<PathBuf>,

    /// Pending rows that trigger a flush
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Keep observations without a usable IMO
    #[arg(long, global = true)]
    save_unidentified: bool,
}

impl Overrides {
    fn get(&self, key: &str) -> Option<String> {
        match key {
            "AIS_REGION_BOUNDARY" => self
                .region_boundary
                .as_ref()
                .map(|p| p.display().to_string()),
            "AIS_BATCH_SIZE" => self.batch_size.map(|n| n.to_string()),
            "AIS_SAVE_UNIDENTIFIED" if self.save_unidentified => Some("true".to_string()),
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .filter_directives("sqlx=info")
    } else {
        LogConfig::builder().filter_directives("sqlx=warn")
    }
    .log_file_prefix("ais-collector")
    .target("ais_collector")
    .build();

    // Environment variables take precedence; the crate directive follows the merged level
    let log_config = log_config.merge_env().context("Invalid logging configuration")?;
    let _guard = init_logging(&log_config).context("Failed to initialize logging")?;

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("TLS crypto provider was already installed");
    }

    let result = run(&cli).await;
    if let Err(ref e) = result {
        error!(error = %format!("{e:#}"), "AIS collector stopped");
    }
    result
}

async fn run(cli: &Cli) -> Result<()> {
    let config =
        CollectorConfig::load(|key| cli.overrides.get(key)).context("Invalid configuration")?;

    let command = cli.command.unwrap_or(Commands::Collect);
    info!(?command, feed = %config.feed.url, "Starting AIS collector");

    let Bootstrap { geofence, store } = startup::bootstrap(&config)
        .await
        .context("Startup failed")?;

    match command {
        Commands::Collect => {
            let identity = startup::load_identities(Arc::clone(&store))
                .await
                .context("Failed to load identity mappings")?;

            let mut pipeline = IngestPipeline::new(store, identity, geofence, &config.ingest);
            let mut connector = StreamConnector::new(
                &config.feed,
                &[MessageKind::ShipStaticData, MessageKind::PositionReport],
            );

            tokio::select! {
                _ = connector.run(&mut pipeline) => {}
                _ = shutdown_signal() => info!("Shutdown requested, flushing pending rows"),
            }

            let totals = pipeline.counters();
            pipeline.shutdown().await;
            info!(
                collected = totals.collected,
                filtered = totals.filtered,
                malformed = totals.malformed,
                "Collection stopped"
            );
        }
        Commands::CorrectDimensions => {
            let mut corrector = DimensionCorrector::new(store, geofence, &config.correction);
            let mut connector = StreamConnector::new(&config.feed, &[MessageKind::ShipStaticData]);

            tokio::select! {
                _ = connector.run(&mut corrector) => {}
                _ = shutdown_signal() => info!("Shutdown requested"),
            }

            let counters = corrector.counters();
            info!(
                processed = counters.processed,
                corrected = counters.corrected,
                ignored = counters.ignored,
                "Dimension correction stopped"
            );
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
