//! Position fusion service
//!
//! Subscribes to GPS, IMU and UWB readings on the MQTT broker, fuses them
//! at a fixed rate and publishes one position record per cycle, also
//! appending it to the record log.
//!
//! # Usage
//!
//! ```bash
//! sensorfusion --config fusion.json
//! sensorfusion --host broker.local --port 1884 --log-level debug
//! sensorfusion --write-default-config fusion.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use tokio::{signal, task};
use tracing::{error, info, warn};

use sensorfusion::api::{FusionEngine, JsonLineLog, TopicPublisher};
use sensorfusion::processing::{MessageParser, PayloadDefaults, SensorStore};
use sensorfusion::transport::{MqttBus, SensorDispatcher};
use sensorfusion::utils::{init_logging, FusionConfig, LogLevel};

/// Multi-sensor position fusion service
#[derive(Parser, Debug)]
#[command(name = "sensorfusion")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file; defaults are used when omitted
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// MQTT broker host
    #[arg(long)]
    host: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    port: Option<u16>,

    /// Record log path
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Write the default configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    write_default_config: Option<PathBuf>,
}

/// Load the configuration file (or defaults) and apply command-line overrides
fn load_config(args: &Args) -> Result<FusionConfig> {
    let mut config = match &args.config_file {
        Some(path) => FusionConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => FusionConfig::default(),
    };

    if let Some(host) = &args.host {
        config.transport.host = host.clone();
    }
    if let Some(port) = args.port {
        config.transport.port = port;
    }
    if let Some(log_file) = &args.log_file {
        config.output.log_file = log_file.clone();
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Some(path) = &args.write_default_config {
        return match FusionConfig::default().save_to_file(path) {
            Ok(()) => {
                println!("Default configuration written to {}", path.display());
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to write configuration: {e}");
                ExitCode::FAILURE
            }
        };
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            init_logging(args.log_level.unwrap_or_default());
            error!("{:#}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(config.log_level);

    match run(config).await {
        Ok(()) => {
            info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Fusion service failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Main service logic
async fn run(config: FusionConfig) -> Result<()> {
    let transport = &config.transport;
    info!(
        host = %transport.host,
        port = transport.port,
        dt = config.filter.dt,
        "Starting position fusion"
    );

    let store = Arc::new(SensorStore::new(&config.initial_readings));

    // The client runs its own event loop, so the handshake stays off the async thread
    let broker = transport.clone();
    let (publisher, mut subscriber) = task::spawn_blocking(move || MqttBus::connect(&broker))
        .await
        .context("Broker connection task failed")?
        .with_context(|| format!("Failed to connect to MQTT broker {}:{}", transport.host, transport.port))?;
    let publisher = Arc::new(publisher);

    let record_log = JsonLineLog::open(&config.output).context("Failed to open record log")?;

    let engine = FusionEngine::new(&config, Arc::clone(&store))?
        .with_sink(Box::new(record_log))
        .with_sink(Box::new(TopicPublisher::new(
            publisher.clone(),
            transport.topics.position.clone(),
        )));

    let dispatcher = SensorDispatcher::new(
        &transport.topics,
        MessageParser::new(PayloadDefaults::from_config(&config)),
        Arc::clone(&store),
    );
    let receiver = thread::Builder::new()
        .name("receiver".to_string())
        .spawn(move || dispatcher.run(&mut subscriber))
        .context("Failed to start receiver thread")?;

    let handle = engine.spawn()?;
    info!(topics = ?transport.topics.inbound(), "Fusion running, press Ctrl+C to stop");

    signal::ctrl_c().await.context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C, initiating shutdown...");

    // Close the broker session first; publishes from the final cycles fail fast
    if let Err(e) = publisher.shutdown() {
        warn!(error = %e, "Failed to close broker connection");
    }

    let stats = handle.stop_and_join()?;
    info!(
        cycles = stats.cycles,
        uwb = stats.uwb_selected,
        gps = stats.gps_selected,
        ekf = stats.ekf_selected,
        skipped_corrections = stats.skipped_corrections,
        failed = stats.failed_cycles,
        sink_failures = stats.sink_failures,
        overruns = stats.overruns,
        "Fusion loop finished"
    );

    let intake = receiver
        .join()
        .map_err(|_| anyhow!("receiver thread panicked"))?;
    info!(
        received = intake.received,
        applied = intake.applied,
        malformed = intake.malformed,
        unknown_topic = intake.unknown_topic,
        "Message intake finished"
    );

    Ok(())
}
