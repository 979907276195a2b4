//! CLI Entry Point for emf_daq
//!
//! Provides command-line interface for:
//! - Polling the meter at a fixed interval and publishing to the sink
//! - Querying every reading once (self-test)
//!
//! # Usage
//!
//! Poll every 20 seconds into InfluxDB (token from `INFLUXDB_TOKEN`):
//! ```bash
//! emf_daq poll --interval 20 --port /dev/gqemf390
//! ```
//!
//! Log points instead of storing them, against the simulated meter:
//! ```bash
//! emf_daq poll --dry-run --simulate
//! ```
//!
//! One-shot query as JSON:
//! ```bash
//! emf_daq query --json
//! ```

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use emf_daq::config::{AppConfig, Overrides, DEFAULT_CONFIG_PATH};
use emf_daq::hardware::{
    Connector, MockConnector, MockInstrument, SerialConnector, SessionTiming, TransportSession,
};
use emf_daq::instrument::{Command, Reading};
use emf_daq::poller::{snapshot, PollerSettings, SnapshotEntry, TelemetryPoller};
use emf_daq::{logging, sink};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "emf_daq")]
#[command(about = "Serial telemetry poller for the GQ EMF-390 meter", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Serial device path (overrides the configuration)
    #[arg(long, global = true)]
    port: Option<String>,

    /// Baud rate (overrides the configuration)
    #[arg(long, global = true)]
    baud: Option<u32>,

    /// Talk to a simulated meter instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll at a fixed interval until interrupted
    Poll {
        /// Seconds between ticks
        #[arg(long)]
        interval: Option<u64>,

        /// Log data points instead of writing them to the sink
        #[arg(long)]
        dry_run: bool,
    },

    /// Read every value once and print it
    Query {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (interval_secs, dry_run) = match &cli.command {
        Commands::Poll { interval, dry_run } => (*interval, *dry_run),
        Commands::Query { .. } => (None, false),
    };
    let overrides = Overrides {
        port: cli.port.clone(),
        baud_rate: cli.baud,
        interval_secs,
        // a one-shot query never publishes, so the sink section does not matter
        dry_run: dry_run || matches!(cli.command, Commands::Query { .. }),
    };

    let config = AppConfig::load_with(&cli.config, &overrides)?;
    logging::init_from_config(&config)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "{} starting",
        config.application.name
    );

    match cli.command {
        Commands::Poll { .. } => run_poller(config, cli.simulate).await,
        Commands::Query { json } => run_query(config, cli.simulate, json).await,
    }
}

fn connector_for(config: &AppConfig, simulate: bool) -> Box<dyn Connector> {
    if simulate {
        info!("Using simulated instrument");
        Box::new(MockConnector::new(MockInstrument::new()))
    } else {
        Box::new(SerialConnector::from_config(&config.device))
    }
}

async fn run_poller(config: AppConfig, simulate: bool) -> Result<()> {
    let sink = sink::build_sink(&config.sink)?;
    let poller = TelemetryPoller::new(
        connector_for(&config, simulate),
        SessionTiming::from(&config.device),
        sink,
        PollerSettings::from_config(&config),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task = tokio::spawn(poller.run(shutdown_rx));

    let joined = tokio::select! {
        joined = &mut task => joined,
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                warn!(error = %e, "Could not listen for interrupt, stopping");
            }
            info!("Interrupt received, stopping poller");
            let _ = shutdown_tx.send(true);
            task.await
        }
    };

    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!("{e}");
            Err(e.into())
        }
        Err(e) => Err(anyhow!("poller task failed: {e}")),
    }
}

async fn run_query(config: AppConfig, simulate: bool, json: bool) -> Result<()> {
    let mut session = match TransportSession::open(
        connector_for(&config, simulate),
        SessionTiming::from(&config.device),
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!("{e}");
            return Err(e.into());
        }
    };

    let entries = snapshot(&mut session, &Command::ALL).await;
    session.close().await;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for entry in &entries {
            print_entry(entry);
        }
    }
    Ok(())
}

fn print_entry(entry: &SnapshotEntry) {
    let name = entry.command.display_name();
    let unit = entry.unit.map(|u| format!(" {u}")).unwrap_or_default();

    match (&entry.reading, &entry.error) {
        (Some(Reading::Scalar(value)), _) => println!("{name}: {value}{unit}"),
        (Some(Reading::Text(text)), _) => println!("{name}: {text}"),
        (Some(Reading::Vector(samples)), _) => {
            let shown = &samples[..samples.len().min(10)];
            println!(
                "{name}: {} samples, first {}: {shown:?}{unit}",
                samples.len(),
                shown.len()
            );
            if let Some(stats) = entry.stats {
                for (suffix, value) in stats.fields() {
                    println!("  {suffix}: {value:.2}{unit}");
                }
            }
        }
        (None, Some(error)) => println!("{name}: {error}"),
        (None, None) => println!("{name}: no reply"),
    }
}
