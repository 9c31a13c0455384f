//! ==============================================================================
//! main.rs - lux host entry point
//! ==============================================================================
//!
//! purpose:
//!     runs the light-sensor test bench: polls a networked lux sensor while a
//!     test is running, keeps every reading in the store, serves the dashboard
//!     and writes a spreadsheet when the test ends.
//!
//! responsibilities:
//!     - load host.toml and initialize logging
//!     - restore the last saved snapshot into the store
//!     - build the poll controller (sensor client + exporter + persistence)
//!     - serve the dashboard / api until ctrl-c
//!     - on shutdown: cancel any running test and save the store
//!
//! subcommands:
//!     serve   (default) dashboard + api
//!     fetch   one reading, printed as json
//!     setip   point the device at a sensor address (POST /setip)
//!     export  write the saved snapshot to a spreadsheet
//!
//! architecture:
//!
//! ```text
//!     ┌─────────────────────────────────────────────────────────────┐
//!     │                    rust host (this file)                     │
//!     │  ┌─────────────┐  ┌─────────────┐  ┌─────────────────────┐  │
//!     │  │ poll timers │  │ web server  │  │ snapshot on stop /  │  │
//!     │  │ (per test)  │  │ (port 3000) │  │ shutdown            │  │
//!     │  └──────┬──────┘  └──────┬──────┘  └──────────┬──────────┘  │
//!     │         └────────────────┼────────────────────┘             │
//!     │                    ┌─────┴─────┐                            │
//!     │                    │   store   │ <- store.rs                │
//!     │                    └───────────┘                            │
//!     └─────────────────────────────────────────────────────────────┘
//!                │ GET /lux
//!                ▼
//!         ┌─────────────┐
//!         │ lux sensor  │
//!         └─────────────┘
//! ```
//!
//! ==============================================================================

use lux_host::config::HostConfig;
use lux_host::export::{self, ExportSink, SpreadsheetExporter};
use lux_host::persist::{LocalStorage, SnapshotPersistence};
use lux_host::poll::{ControllerOptions, PollController};
use lux_host::sensor::{HttpSensorClient, LuxSource};
use lux_host::server::{self, AppState};
use lux_host::setup;
use lux_host::store::{ReadingStore, StoreEvent};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "lux-host")]
#[command(about = "Lux sensor test bench: poll, record, export", long_about = None)]
struct Cli {
    /// config file (default: config/host.toml or ../config/host.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the dashboard and control api (default)
    Serve,

    /// Fetch a single reading and print it
    Fetch {
        /// sensor address, overrides [sensor].address
        #[arg(long)]
        address: Option<String>,
    },

    /// Tell the device which address to report as (POST /setip)
    Setip {
        /// address to send, defaults to [sensor].address
        #[arg(long)]
        ip: Option<String>,
        /// setup host, defaults to [sensor].setup_host
        #[arg(long)]
        host: Option<String>,
    },

    /// Export the saved snapshot to a spreadsheet
    Export {
        /// output directory, defaults to [export].directory
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn snapshot_persistence(config: &HostConfig) -> SnapshotPersistence {
    SnapshotPersistence::new(LocalStorage::new(&config.persistence.path), config.persistence.key.clone())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // step 1: load configuration
    let config = match &cli.config {
        Some(path) => HostConfig::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => HostConfig::load_or_default(),
    };
    init_logging(&config.logging.level);

    let timeout = Duration::from_millis(config.sensor.timeout_ms);

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Fetch { address } => {
            let address = address.unwrap_or_else(|| config.sensor.address.clone());
            let client = HttpSensorClient::new(timeout)?;
            let reading = client
                .fetch_reading(&address)
                .await
                .with_context(|| format!("fetching from {}", address))?;
            println!("{}", serde_json::to_string_pretty(&reading)?);
            Ok(())
        }
        Commands::Setip { ip, host } => {
            let ip = ip.unwrap_or_else(|| config.sensor.address.clone());
            let host = host.unwrap_or_else(|| config.sensor.setup_host.clone());
            setup::announce_ip(&host, &ip, timeout).await;
            Ok(())
        }
        Commands::Export { dir } => {
            let store = ReadingStore::new();
            if !snapshot_persistence(&config).restore(&store) {
                tracing::warn!("[EXPORT] no saved snapshot at {}", config.persistence.path.display());
            }
            let dir = dir.unwrap_or_else(|| config.export.directory.clone());
            let readings: Vec<_> = store.readings().into_iter().map(|r| r.reading).collect();
            let path = export::export_snapshot(&readings, &dir)?;
            println!("{} readings -> {}", readings.len(), path.display());
            Ok(())
        }
    }
}

async fn serve(config: HostConfig) -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Lux Host - Sensor Test Bench");
    println!("===========================================================");
    config.print_summary();

    // step 2: store, restored from the last session
    let store = ReadingStore::new();
    let persistence = snapshot_persistence(&config);
    if persistence.restore(&store) {
        tracing::info!("[STARTUP] ✓ Restored {} readings", store.len());
    }

    // echo every recorded reading; held for the life of the server
    let _echo = config.logging.show_sensor_data.then(|| {
        store.subscribe(|event| {
            if let StoreEvent::Added { reading, .. } = event {
                tracing::info!("[LUX] {} | {:.1} lx", reading.timestamp, reading.lux_value);
            }
        })
    });

    // step 3: poll controller
    let client = HttpSensorClient::new(Duration::from_millis(config.sensor.timeout_ms))
        .context("failed to build sensor http client")?;
    let exporter: Arc<dyn ExportSink> = Arc::new(SpreadsheetExporter::new(&config.export.directory));
    let options = ControllerOptions {
        exporter: Some(exporter),
        export_on_manual_stop: config.export.on_manual_stop,
        persistence: Some(persistence.clone()),
    };
    let controller = PollController::new(Arc::new(client), store.clone(), config.poll_settings(), options)?;

    // step 4: web server until ctrl-c
    let state = AppState { controller: controller.clone(), export_dir: config.export.directory.clone() };
    tokio::select! {
        res = server::run_server(&config.server.bind, state) => {
            if let Err(e) = &res {
                tracing::error!("[ERROR] Web server error: {:#}", e);
            }
            res?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[SHUTDOWN] ctrl-c received");
        }
    }

    // step 5: teardown
    controller.shutdown();
    persistence.persist(&store);
    tracing::info!("[SHUTDOWN] ✓ Saved {} readings", store.len());
    Ok(())
}
