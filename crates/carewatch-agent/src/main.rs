//! `carewatch` daemon: conditions wearable telemetry, runs the fall and
//! vitals detectors and escalates alerts.
//!
//! Usage:
//!   carewatch --simulate
//!   carewatch --device /dev/ttyUSB0 --data-dir ./data
//!   carewatch --tcp 192.168.4.1:3333 --config carewatch.json

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use carewatch_agent::{AgentError, DeviceSource, Pipeline, Scheduler, UnitExit};
use carewatch_core::PipelineConfig;
use clap::Parser;
use tracing::{error, info, warn};

/// Wearable telemetry pipeline.
#[derive(Parser, Debug)]
#[command(name = "carewatch", version, about = "Condition wearable telemetry and escalate falls and abnormal vitals")]
struct Args {
    /// JSON configuration file (defaults apply to omitted fields)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory for fall_events.json, vitals_stream.json and escalation.json;
    /// stores stay in memory when unset
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Serial device or replay file to read device lines from
    #[arg(long, value_name = "PATH", conflicts_with_all = ["tcp", "simulate"])]
    device: Option<PathBuf>,

    /// host:port of a serial-to-TCP bridge
    #[arg(long, value_name = "ADDR", conflicts_with = "simulate")]
    tcp: Option<String>,

    /// Use the built-in device simulator
    #[arg(long)]
    simulate: bool,

    /// Fall detector poll period in milliseconds
    #[arg(long, value_name = "MS")]
    fall_interval_ms: Option<u64>,

    /// Vitals detector poll period in milliseconds
    #[arg(long, value_name = "MS")]
    vitals_interval_ms: Option<u64>,
}

impl Args {
    fn source(&self) -> DeviceSource {
        match (&self.device, &self.tcp) {
            (Some(path), _) => DeviceSource::Path(path.clone()),
            (None, Some(addr)) => DeviceSource::Tcp(addr.clone()),
            (None, None) => DeviceSource::Simulator,
        }
    }

    fn load_config(&self) -> Result<PipelineConfig, AgentError> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.store.data_dir = Some(dir.clone());
        }
        if let Some(ms) = self.fall_interval_ms {
            config.scheduler.fall_interval_ms = ms;
        }
        if let Some(ms) = self.vitals_interval_ms {
            config.scheduler.vitals_interval_ms = ms;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    if args.device.is_none() && args.tcp.is_none() && !args.simulate {
        warn!("No --device or --tcp given, falling back to the simulator");
    }

    let pipeline = match args.load_config().and_then(Pipeline::from_config) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "Failed to start pipeline");
            return ExitCode::FAILURE;
        }
    };
    match &pipeline.config.store.data_dir {
        Some(dir) => info!(data_dir = %dir.display(), "Using JSON file stores"),
        None => info!("Using in-memory stores"),
    }

    let mut scheduler = Scheduler::new();
    pipeline.schedule_detectors(&mut scheduler);

    let source = args.source();
    let source_config = pipeline.config.source.clone();
    let conditioner = pipeline.conditioner().into_shared();
    let shutdown = scheduler.shutdown_signal();
    let ingest_unit = Arc::clone(&conditioner);
    let mut ingest = tokio::spawn(async move {
        source.run(&ingest_unit, &source_config, shutdown).await;
    });

    let mut ingest_done = None;
    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutdown signal received");
        }
        joined = &mut ingest => {
            ingest_done = Some(joined);
            // Replay finished: give the detectors one more period to catch up.
            let settle = pipeline
                .config
                .scheduler
                .fall_interval()
                .max(pipeline.config.scheduler.vitals_interval());
            info!(settle_ms = settle.as_millis() as u64, "Device source finished");
            tokio::time::sleep(settle + Duration::from_millis(100)).await;
        }
    }

    let outcomes = scheduler.shutdown().await;
    let ingest_result = match ingest_done {
        Some(joined) => joined,
        None => ingest.await,
    };
    if let Err(e) = ingest_result {
        error!(error = %AgentError::from(e), "Ingest task failed");
    }
    let stats = conditioner.lock().stats();
    info!(
        received = stats.lines_received,
        discarded = stats.lines_discarded,
        motion = stats.motion_records,
        vitals = stats.vitals_records,
        append_errors = stats.append_errors,
        reconnects = stats.reconnects,
        "Ingest summary"
    );
    if let Ok(count) = pipeline.stores.escalation.len() {
        info!(alerts = count, "Escalation store");
    }

    let mut failed = false;
    for outcome in &outcomes {
        match &outcome.exit {
            UnitExit::Stopped => info!(unit = %outcome.name, cycles = outcome.cycles, "Unit finished"),
            UnitExit::Failed(e) => {
                failed = true;
                error!(unit = %outcome.name, error = %e, "Unit failed");
            }
            UnitExit::Panicked(msg) => {
                failed = true;
                error!(unit = %outcome.name, panic = %msg, "Unit panicked");
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
