// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # HA Controller
//!
//! Core of a home-automation coordinator: a device registry with TTL-based
//! liveness, a condition/action scene engine, and a dispatcher for the GFF
//! (Generic Frame Format) wire protocol spoken by the radio nodes and the
//! BLE configurator.
//!
//! ## Key Features
//!
//! - **Device Registry**: fixed-capacity table of device values, evicted when
//!   their TTL runs out
//! - **Scenes**: up to 25 rules per scene, evaluated on device reports and
//!   clock ticks
//! - **Remote Provisioning**: upload a scene rule by rule with re-requests for
//!   missing rules
//! - **Persistence**: plain-text device list, scene and zone files
//!
//! ## Quick Start
//!
//! ```rust
//! use ha_controller::{
//!     device_type, Action, CompareOp, Condition, DeviceId, DeviceRecord, DeviceRegistry,
//!     FixedClock, Rule, Scene, SceneName,
//! };
//!
//! let button = DeviceId::new(1, 1, 0, device_type::BUTTON);
//! let lamp = DeviceId::new(1, 2, 0, device_type::ON_OFF_OUTPUT);
//!
//! let rule = Rule::new(true)
//!     .with_input(Condition::Compare { op: CompareOp::Equal, device_id: button, value: 1 })
//!     .unwrap()
//!     .with_output(Action::set_device_value(lamp, 100))
//!     .unwrap();
//!
//! let mut scene = Scene::new(SceneName::new("evening").unwrap(), "scenes/evening");
//! scene.add_rule(rule, 0).unwrap();
//!
//! let registry = DeviceRegistry::new(16);
//! let press = DeviceRecord { device_id: button, value: 1, ttl: 30 };
//! let actions = scene.evaluate(true, Some(&press), &registry, &FixedClock::default());
//! assert_eq!(actions, vec![Action::set_device_value(lamp, 100)]);
//! ```
//!
//! ## Modules
//!
//! - [`codec`]: Byte helpers and packed device ids
//! - [`time`]: Packed wall-clock time and clocks
//! - [`error`]: Error types
//! - [`config`]: Controller configuration
//! - [`frame`]: GFF frame layout and command codes
//! - [`message`]: Typed GFF messages
//! - [`queue`]: Frame queues between transports and the controller
//! - [`registry`]: Device registry
//! - [`rule`]: Conditions, actions and rules
//! - [`scene`]: Scene rule tables
//! - [`scene_manager`]: Scene slots and remote provisioning
//! - [`zone`]: Zone names
//! - [`dispatcher`]: GFF command handling
//! - [`controller`]: Controller context and message handling
//! - [`runtime`]: Controller task and timers

// Modules
pub mod codec;
pub mod config;
pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod frame;
pub mod message;
pub mod queue;
pub mod registry;
pub mod rule;
pub mod runtime;
pub mod scene;
pub mod scene_manager;
pub mod time;
pub mod zone;

// Re-exports for convenient access
pub use codec::{device_type, DeviceId, IoClass};
pub use config::{ControllerConfig, ProvisioningConfig, QueueConfig, StoragePaths};
pub use controller::{Controller, ControllerMessage, OutboundNotice};
pub use dispatcher::Dispatcher;
pub use error::{FrameError, HaError, QueueError, RegistryError, Result, SceneError, StorageError};
pub use frame::{Command, GffFrame};
pub use message::{Envelope, GffMessage, Origin};
pub use queue::{FrameQueue, SharedFrameQueue};
pub use registry::{DeviceRecord, DeviceRegistry};
pub use rule::{Action, ActionKind, CompareOp, Condition, Rule, RuleRecord};
pub use runtime::{spawn, ControllerHandle, FrameSink};
pub use scene::{Scene, SceneName, SCENE_MAX_RULES};
pub use scene_manager::{ProvisioningPhase, ProvisioningSession, SceneManager, SceneSlot};
pub use time::{Clock, FixedClock, PackedTime, SystemClock};
pub use zone::ZoneRegistry;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
