//! Township simulation binary.
//!
//! Wires the configured agents, the reasoning and embedding services, and
//! the tracing-only embodiment into a scheduler, then runs the tick loop
//! until Ctrl-C (or `--ticks` ticks).
//!
//! # Startup Sequence
//!
//! 1. Parse arguments and load `township-config.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the reasoning and embedding services from the environment
//! 4. Load personas, schedules, and memories; register the agents
//! 5. Create the simulated clock and the scheduler
//! 6. Install the Ctrl-C handler and run
//! 7. Log the result

mod error;
mod setup;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use township_core::clock::SimClock;
use township_core::config::SimulationConfig;
use township_core::embodiment::TracingEmbodiment;
use township_core::scheduler::Scheduler;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "township-engine")]
#[command(about = "Run a town of LLM-driven agents through simulated days")]
struct Cli {
    /// Configuration file.
    #[arg(long, env = "TOWNSHIP_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many ticks instead of running until Ctrl-C.
    #[arg(long)]
    ticks: Option<u64>,
}

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any startup step fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // 1. Load configuration.
    let config_path = cli.config.unwrap_or_else(SimulationConfig::default_path);
    let (config, from_file) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .init();

    info!("township-engine starting");
    if from_file {
        info!(path = %config_path.display(), agents = config.agents.len(), "configuration loaded");
    } else {
        warn!(path = %config_path.display(), "config file not found, using defaults");
    }

    // 3. Services.
    let services = setup::build_services(&config).await?;

    // 4. Agents.
    let town = setup::assemble(&config, &services, Arc::new(TracingEmbodiment)).await?;

    // 5. Clock and scheduler.
    let clock = SimClock::new(town.start_minute, config.world.step_minutes)
        .map_err(EngineError::from)?;
    let mut scheduler = Scheduler::new(town.context, clock, config.world.tick_interval())
        .map_err(EngineError::from)?;

    // 6. Ctrl-C finishes the running tick, then stops.
    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, stopping after the current tick");
            shutdown.request();
        }
    });

    let summary = match cli.ticks {
        Some(ticks) => scheduler.run_ticks(ticks).await,
        None => scheduler.start().await,
    };

    // 7. Log results.
    info!(
        end_reason = ?summary.end_reason,
        ticks = summary.ticks,
        final_minute = %scheduler.clock().label(),
        "township-engine shutdown complete"
    );

    Ok(())
}

/// Load the configuration at `path`, or defaults when it does not exist.
fn load_config(path: &std::path::Path) -> Result<(SimulationConfig, bool), EngineError> {
    if path.exists() {
        Ok((SimulationConfig::from_file(path)?, true))
    } else {
        Ok((SimulationConfig::parse("")?, false))
    }
}
