// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Controller configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scene::{SceneName, DEFAULT_SCENE_NAME};

/// Master configuration for the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Root directory for device list, scenes and zones.
    pub storage_root: PathBuf,

    /// Device registry slots.
    pub registry_capacity: usize,

    /// Frame queue sizes.
    pub queues: QueueConfig,

    /// TTL (seconds) given to a device on every report or keep-alive.
    pub device_alive_ttl: i16,

    /// Seconds between device list saves.
    pub dev_list_save_period_s: u32,

    /// Fine timer period (ms) driving provisioning timeouts.
    pub fine_tick_ms: u32,

    /// Controller inbox depth.
    pub inbox_capacity: usize,

    /// Scene provisioning timeouts.
    pub provisioning: ProvisioningConfig,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("."),
            registry_capacity: 64,
            queues: QueueConfig::default(),
            device_alive_ttl: 30,
            dev_list_save_period_s: 5,
            fine_tick_ms: 100,
            inbox_capacity: 32,
            provisioning: ProvisioningConfig::default(),
        }
    }
}

impl ControllerConfig {
    /// Create a configuration rooted at `storage_root`
    pub fn with_storage_root(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    /// Create a configuration with a custom registry size
    pub fn with_registry_capacity(registry_capacity: usize) -> Self {
        Self {
            registry_capacity,
            ..Default::default()
        }
    }

    /// File layout under the storage root
    pub fn paths(&self) -> StoragePaths {
        StoragePaths::new(&self.storage_root)
    }
}

/// Frame queue sizes in bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Radio transport to controller.
    pub radio_inbound: usize,
    /// Controller to radio transport.
    pub radio_outbound: usize,
    /// BLE bridge to controller.
    pub ble_inbound: usize,
    /// Controller to BLE bridge.
    pub ble_outbound: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            radio_inbound: 256,
            radio_outbound: 256,
            ble_inbound: 1024,
            ble_outbound: 1024,
        }
    }
}

/// Scene provisioning timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// Seconds to wait for the rule count after `SET_NEW_SCENE`.
    pub overall_timeout_s: u16,
    /// Milliseconds allowed per expected rule.
    pub per_rule_timeout_ms: u32,
    /// Rounds of re-requests for missing rules.
    pub resend_budget: u8,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            overall_timeout_s: 25,
            per_rule_timeout_ms: 1000,
            resend_budget: 1,
        }
    }
}

/// File layout of the controller storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    /// Device list file.
    pub dev_list: PathBuf,
    /// Folder holding one file per scene.
    pub scenes_dir: PathBuf,
    /// File holding the active scene's bare name.
    pub active_scene: PathBuf,
    /// Folder holding one file per zone.
    pub zones_dir: PathBuf,
}

impl StoragePaths {
    /// Derive every path from `root`
    pub fn new(root: &Path) -> Self {
        Self {
            dev_list: root.join("dev_lst"),
            scenes_dir: root.join("scenes"),
            active_scene: root.join("actscene"),
            zones_dir: root.join("zones"),
        }
    }

    /// File backing scene `name`
    pub fn scene_file(&self, name: &SceneName) -> PathBuf {
        self.scenes_dir.join(name.as_str())
    }

    /// File backing the default scene
    pub fn default_scene(&self) -> PathBuf {
        self.scenes_dir.join(DEFAULT_SCENE_NAME)
    }
}
