use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;
use traffic_core::config::{load_from_file, ConfigError, TrafficConfig};
use traffic_core::error::TrafficError;
use traffic_core::platform::{Platform, PlatformError};
use traffic_core::service::Coordinate;

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "traffic",
    about = "Road traffic simulation with online congestion prediction",
    long_about = "Simulates a road network tick by tick, retrains a congestion\n\
                  model in the background and answers route queries."
)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true, env = "TRAFFIC_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive the scheduler until the duration elapses or Ctrl-C
    Run {
        /// Stop after this many seconds
        #[arg(long)]
        duration_secs: Option<u64>,
        /// Seconds between status log lines
        #[arg(long, default_value_t = 10)]
        status_every_secs: u64,
    },
    /// Warm up the simulation, then analyse one route and print it as JSON
    Route {
        #[arg(long, allow_negative_numbers = true)]
        origin_lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        origin_lon: f64,
        #[arg(long, allow_negative_numbers = true)]
        dest_lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        dest_lon: f64,
        /// Ticks to simulate before routing
        #[arg(long, default_value_t = 120)]
        warmup_ticks: usize,
    },
    /// Print the default configuration as TOML
    Config,
}

#[derive(Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Traffic(#[from] TrafficError),

    #[error("failed to encode output: {0}")]
    Encode(String),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing init failed: {e}");
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<TrafficConfig, CliError> {
    let config = match path {
        Some(path) => load_from_file(path)?,
        None => TrafficConfig::default(),
    };
    Ok(config.with_env_overrides())
}

async fn run(
    config: TrafficConfig,
    duration_secs: Option<u64>,
    status_every_secs: u64,
) -> Result<(), CliError> {
    let platform = Platform::build(config).await?;
    let handle = platform.scheduler().spawn();

    let deadline = async {
        match duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);
    let mut status_ticker = tokio::time::interval(Duration::from_secs(status_every_secs.max(1)));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                info!("run duration elapsed");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
            _ = status_ticker.tick() => {
                let status = platform.service.status();
                info!(
                    tick = status.simulation.tick,
                    timestamp = %status.simulation.timestamp,
                    model = %status.model,
                    observations = platform.prediction.observation_count(),
                    "status"
                );
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

async fn route(
    config: TrafficConfig,
    origin: Coordinate,
    destination: Coordinate,
    warmup_ticks: usize,
) -> Result<(), CliError> {
    let platform = Platform::build(config).await?;
    let mut scheduler = platform.scheduler();
    for _ in 0..warmup_ticks {
        scheduler.run_tick().await;
    }
    scheduler.finish_retrain().await;

    let analysis = platform.service.analyze_route(origin, destination)?;
    let json = serde_json::to_string_pretty(&analysis).map_err(|e| CliError::Encode(e.to_string()))?;
    println!("{json}");
    Ok(())
}

fn print_default_config() -> Result<(), CliError> {
    let toml = toml::to_string_pretty(&TrafficConfig::default())
        .map_err(|e| CliError::Encode(e.to_string()))?;
    print!("{toml}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let result = match cli.command {
        Commands::Config => print_default_config(),
        Commands::Run {
            duration_secs,
            status_every_secs,
        } => match load_config(cli.config.as_ref()) {
            Ok(config) => run(config, duration_secs, status_every_secs).await,
            Err(e) => Err(e),
        },
        Commands::Route {
            origin_lat,
            origin_lon,
            dest_lat,
            dest_lon,
            warmup_ticks,
        } => match load_config(cli.config.as_ref()) {
            Ok(config) => {
                route(
                    config,
                    Coordinate::new(origin_lat, origin_lon),
                    Coordinate::new(dest_lat, dest_lon),
                    warmup_ticks,
                )
                .await
            }
            Err(e) => Err(e),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
