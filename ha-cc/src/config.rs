// HA Coordinator - Home-automation coordinator daemon
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Daemon configuration file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use ha_controller::ControllerConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("Cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// File is not valid JSON for [`DaemonConfig`]
    #[error("Cannot parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// One UDP side of the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Local address to listen on.
    pub bind: SocketAddr,
    /// Fixed peer for outbound frames. Without it, replies go to the last
    /// sender.
    #[serde(default)]
    pub peer: Option<SocketAddr>,
}

impl BridgeConfig {
    fn local(port: u16) -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], port)),
            peer: None,
        }
    }
}

/// Complete daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Controller core settings.
    pub controller: ControllerConfig,
    /// Radio border router side.
    pub radio: BridgeConfig,
    /// BLE bridge side.
    pub ble: BridgeConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            radio: BridgeConfig::local(4310),
            ble: BridgeConfig::local(4311),
        }
    }
}

impl DaemonConfig {
    /// Load a JSON configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
