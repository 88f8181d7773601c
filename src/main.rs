//! ==============================================================================
//! main.rs - recordtemp entry point
//! ==============================================================================
//!
//! purpose:
//!     a data-logging daemon for a raspberry pi with a dht22 sensor. it polls
//!     the sensor, echoes readings when asked to, and writes every complete
//!     reading to the `temperaturedata` table.
//!
//! responsibilities:
//!     - parse the command line (positional `log` mode, export flags)
//!     - load configuration and start tracing
//!     - wait out the warm-up, then open the single store connection
//!     - run the logger loop until SIGINT/SIGTERM, then close the connection
//!
//! relationships:
//!     - uses: config.rs, telemetry.rs (startup)
//!     - uses: hal.rs (sensor), store.rs (connection), logger.rs (loop)
//!     - uses: export.rs (one-shot history dump)
//!
//!     ┌─────────────┐  read   ┌─────────────┐  insert  ┌─────────────────┐
//!     │   dht22     │ ──────▶ │ logger loop │ ───────▶ │ temperaturedata │
//!     │  (hal.rs)   │         │ (logger.rs) │          │   (store.rs)    │
//!     └─────────────┘         └──────┬──────┘          └─────────────────┘
//!                                    │ shutdown watch
//!                             ┌──────┴──────┐
//!                             │ ctrl-c/term │
//!                             └─────────────┘
//!
//! ==============================================================================

mod config;
mod domain;
mod error;
mod export;
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
mod gpio;
mod hal;
mod logger;
mod store;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

use crate::config::{HostConfig, LoadedConfig};
use crate::logger::{LoggerLoop, LoopSettings};
use crate::store::{MySqlStore, ReadingStore};

#[derive(Parser, Debug)]
#[command(name = "recordtemp", version, about = "Log DHT22 temperature/humidity readings to MySQL")]
struct Cli {
    /// `log` echoes every reading to stdout; anything else is silent
    mode: Option<String>,

    /// Config file (default: config/recordtemp.toml, then ../config/recordtemp.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print stored history as JSON and exit instead of logging
    #[arg(long)]
    export: bool,

    /// With --export: only the last HOURS hours (0 or negative = everything)
    #[arg(long, default_value_t = 0, requires = "export", allow_negative_numbers = true)]
    hours: i64,

    /// With --export: upper bound on the number of points returned (0 = 2000)
    #[arg(long, default_value_t = 2000, requires = "export")]
    max_points: u32,
}

/// log mode is on only for the exact argument `log`
fn log_mode(mode: Option<&str>) -> bool {
    mode == Some("log")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = match cli.config.clone() {
        Some(path) => LoadedConfig::from_file(path).context("failed to load --config file")?,
        None => HostConfig::load_or_default(),
    };
    telemetry::init_tracing(&loaded.config.logging.level)?;
    loaded.report();
    let config = loaded.config;

    if cli.export {
        let store = connect(&config).await?;
        return run_export(store, cli.hours, cli.max_points).await;
    }

    let (stop, mut shutdown) = watch::channel(false);
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("[SHUTDOWN] signal received");
        let _ = stop.send(true);
    });

    let settings = LoopSettings::from_config(&config);
    if !logger::warm_up(settings.warmup, &mut shutdown).await {
        tracing::info!("[SHUTDOWN] stopped during warm-up");
        return Ok(());
    }

    let store = connect(&config).await?;
    let sensor = Arc::new(hal::Dht22::new(&config.sensor));
    let console = log_mode(cli.mode.as_deref()).then(std::io::stdout);
    let logger = LoggerLoop::new(sensor, store, settings, shutdown).with_console(console);

    // the store is closed by now either way; a fatal error is reported once here
    if let Err(e) = logger.run_to_completion().await {
        tracing::error!("[ERROR] Fatal: {}", e);
        std::process::exit(1);
    }
    tracing::info!("[SHUTDOWN] logger stopped");
    Ok(())
}

async fn connect(config: &HostConfig) -> Result<MySqlStore> {
    MySqlStore::connect(&config.database)
        .await
        .with_context(|| format!("failed to connect to {}@{}", config.database.name, config.database.host))
}

async fn run_export(mut store: MySqlStore, hours: i64, max_points: u32) -> Result<()> {
    let rows = store.history(hours).await.context("failed to load history")?;
    let series = export::downsample(&rows, max_points as usize);
    tracing::info!(rows = rows.len(), points = series.dateandtime.len(), "exporting history");

    println!("{}", serde_json::to_string(&series)?);
    store.close().await?;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
