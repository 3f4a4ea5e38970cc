//! CLI entry point for sensor_daq
//!
//! # Usage
//!
//! Acquire until Ctrl-C, logging a status line periodically:
//! ```bash
//! sensor_daq run --config config/sensor_daq.toml
//! sensor_daq --simulate run --status-secs 2
//! ```
//!
//! Print where each sensor is plugged in:
//! ```bash
//! sensor_daq detect --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sensor_daq::detection::{AssignmentTable, DetectionReport};
use sensor_daq::logging::{self, LoggingConfig, OutputFormat};
use sensor_daq::{Acquisition, Channel, DaqConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sensor_daq")]
#[command(about = "Serial sensor acquisition with auto-detection and health tracking", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/sensor_daq.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use emulated sensors instead of serial ports
    #[arg(long, global = true)]
    simulate: bool,

    /// Log output format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Acquire until interrupted
    Run {
        /// Seconds between status lines
        #[arg(long, default_value = "5")]
        status_secs: u64,
    },

    /// Detect sensor ports and print the assignment table
    Detect {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => DaqConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => DaqConfig::load().context("Failed to load configuration")?,
    };
    if cli.simulate {
        config.hardware.simulate = true;
    }

    let level = logging::parse_log_level(&config.application.log_level)
        .map_err(anyhow::Error::msg)?;
    logging::init(LoggingConfig::new(level).with_format(cli.log_format))
        .map_err(anyhow::Error::msg)?;

    let acquisition = Acquisition::new(config).context("Invalid configuration")?;

    match cli.command {
        Commands::Run { status_secs } => run(acquisition, status_secs).await,
        Commands::Detect { json } => detect(acquisition, json).await,
    }
}

async fn run(acquisition: Acquisition, status_secs: u64) -> Result<()> {
    let assignments = if acquisition.config().hardware.simulate {
        AssignmentTable::new()
    } else {
        acquisition
            .detect()
            .await
            .context("Sensor detection failed")?
            .assignments
    };

    let handle = acquisition.start(&assignments);
    let mut status = tokio::time::interval(Duration::from_secs(status_secs.max(1)));

    loop {
        tokio::select! {
            _ = status.tick() => log_status(&acquisition),
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    warn!(error = %e, "Failed to listen for Ctrl-C, stopping");
                }
                break;
            }
        }
    }

    handle.shutdown().await;
    Ok(())
}

fn log_status(acquisition: &Acquisition) {
    for channel in Channel::all() {
        let tracked = channel
            .physical_sources()
            .iter()
            .all(|c| acquisition.channels().contains(c));
        if !tracked {
            continue;
        }
        let state = acquisition.get_state(channel);
        match acquisition.get_latest(channel) {
            Ok(sample) => info!(
                channel = %channel,
                state = %state,
                value = %format!("{:.3}", sample.value),
                samples = acquisition.stats(channel).count,
                "Status"
            ),
            Err(_) => info!(channel = %channel, state = %state, "Status"),
        }
    }
}

async fn detect(acquisition: Acquisition, json: bool) -> Result<()> {
    let report = acquisition
        .detect()
        .await
        .context("Sensor detection failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&acquisition, &report);
    }
    Ok(())
}

fn print_report(acquisition: &Acquisition, report: &DetectionReport) {
    println!("{:<8} {:<24} {:>7} {:>10}", "SENSOR", "PORT", "BAUD", "CONFIDENCE");
    for assignment in report.assignments.values() {
        let flag = if assignment.off_expected_baud {
            "  (unexpected baud)"
        } else {
            ""
        };
        println!(
            "{:<8} {:<24} {:>7} {:>9.0}%{}",
            assignment.channel.name(),
            assignment.port,
            assignment.baud,
            assignment.confidence * 100.0,
            flag
        );
    }
    for missing in report.missing(acquisition.channels()) {
        println!("{:<8} {:<24}", missing.name(), "not detected");
    }
    for conflict in &report.conflicts {
        println!("note: {}", conflict.to_error());
    }
}
