// HA Coordinator - Home-automation coordinator daemon
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # HA Coordinator
//!
//! Runs the scene controller and bridges it to the radio border router and
//! the BLE bridge over UDP.
//!
//! ## Usage
//!
//! ```bash
//! # Run with defaults, storing state in the current directory
//! ha-cc
//!
//! # Use a configuration file and a dedicated storage folder
//! ha-cc --config /etc/ha-cc.json --storage-root /var/lib/ha
//!
//! # Send radio frames to a fixed border router
//! ha-cc --radio-bind 0.0.0.0:4310 --radio-peer 192.168.1.20:4310
//! ```

mod config;
mod transport;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use ha_controller::{spawn, Controller, HaError, Origin};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use config::{ConfigError, DaemonConfig};
use transport::Bridge;

/// Depth of each transport's outbound notice channel
const NOTICE_CAPACITY: usize = 16;

/// HA coordinator daemon
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Folder for the device list, scenes and zones
    #[arg(short, long)]
    storage_root: Option<PathBuf>,

    /// Local UDP address for the radio side
    #[arg(long)]
    radio_bind: Option<SocketAddr>,

    /// Fixed radio peer (default: last sender)
    #[arg(long)]
    radio_peer: Option<SocketAddr>,

    /// Local UDP address for the BLE side
    #[arg(long)]
    ble_bind: Option<SocketAddr>,

    /// Fixed BLE peer (default: last sender)
    #[arg(long)]
    ble_peer: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Fatal daemon errors
#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Controller error: {0}")]
    Controller(#[from] HaError),
}

impl Args {
    fn into_config(self) -> Result<DaemonConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => DaemonConfig::load(path)?,
            None => DaemonConfig::default(),
        };
        if let Some(root) = self.storage_root {
            config.controller.storage_root = root;
        }
        if let Some(bind) = self.radio_bind {
            config.radio.bind = bind;
        }
        if self.radio_peer.is_some() {
            config.radio.peer = self.radio_peer;
        }
        if let Some(bind) = self.ble_bind {
            config.ble.bind = bind;
        }
        if self.ble_peer.is_some() {
            config.ble.peer = self.ble_peer;
        }
        Ok(config)
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    info!("HA Coordinator v{}", env!("CARGO_PKG_VERSION"));

    let config = args.into_config()?;
    info!("Storage root: {}", config.controller.storage_root.display());
    std::fs::create_dir_all(&config.controller.storage_root)?;

    let mut controller = Controller::new(config.controller.clone());
    let (radio_tx, radio_rx) = mpsc::channel(NOTICE_CAPACITY);
    let (ble_tx, ble_rx) = mpsc::channel(NOTICE_CAPACITY);
    controller.notify_radio(radio_tx);
    controller.notify_ble(ble_tx);
    let handle = spawn(controller);

    let radio = Bridge::bind(
        config.radio.bind,
        config.radio.peer,
        handle.sink(Origin::Radio),
        radio_rx,
    )
    .await?;
    let ble = Bridge::bind(
        config.ble.bind,
        config.ble.peer,
        handle.sink(Origin::Ble),
        ble_rx,
    )
    .await?;
    let bridges = [tokio::spawn(radio.run()), tokio::spawn(ble.run())];

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Cannot listen for interrupt: {}", e);
    }
    info!("Shutting down");

    for bridge in &bridges {
        bridge.abort();
    }
    let controller = handle.shutdown().await?;
    info!(
        "Saved {} devices, active scene: {}",
        controller.registry().len(),
        controller
            .scenes()
            .active()
            .map(|name| name.as_str())
            .unwrap_or("none")
    );
    Ok(())
}
