// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Controller context
//!
//! The [`Controller`] owns the device registry, the scene manager and the
//! zone store. It is driven by [`ControllerMessage`]s: inbound queue
//! notifications and timer ticks. Replies are pushed to the outbound queue
//! of the target side before that side's transport is notified.
//!
//! # Example
//!
//! ```rust
//! use ha_controller::{Controller, ControllerConfig, ControllerMessage, GffMessage, DeviceId};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let mut controller = Controller::new(ControllerConfig::with_storage_root(dir.path()));
//! controller.start();
//!
//! let report = GffMessage::SetDevVal { device_id: DeviceId(0x0101_0002), value: 1 };
//! let inbound = controller.radio_inbound().clone();
//! inbound.push(&report.to_bytes()).unwrap();
//! assert!(controller.handle(ControllerMessage::RadioGffPending(inbound)));
//!
//! assert_eq!(controller.registry().get_value(DeviceId(0x0101_0002)), Some(1));
//! ```

use log::{debug, error, info, warn};
use tokio::sync::mpsc;

use crate::config::ControllerConfig;
use crate::dispatcher::{actions_to_radio, Dispatcher};
use crate::message::{Envelope, GffMessage, Origin};
use crate::queue::SharedFrameQueue;
use crate::registry::DeviceRegistry;
use crate::scene_manager::SceneManager;
use crate::time::{Clock, SystemClock};
use crate::zone::ZoneRegistry;

/// Messages accepted by the controller task
#[derive(Debug, Clone)]
pub enum ControllerMessage {
    /// Frames waiting in a radio-side queue
    RadioGffPending(SharedFrameQueue),
    /// Frames waiting in a BLE-side queue
    BleGffPending(SharedFrameQueue),
    /// Coarse timer
    OneSecondTick,
    /// Fine timer, for provisioning timeouts
    FineTick { elapsed_ms: u32 },
    /// Save state and stop
    Shutdown,
}

/// Notification that an outbound queue holds frames
#[derive(Debug, Clone)]
pub struct OutboundNotice {
    pub queue: SharedFrameQueue,
}

/// Outbound queue plus the transport to wake
#[derive(Debug)]
struct Outbound {
    queue: SharedFrameQueue,
    notify: Option<mpsc::Sender<OutboundNotice>>,
}

impl Outbound {
    fn new(name: &'static str, capacity: usize) -> Self {
        Self {
            queue: SharedFrameQueue::new(name, capacity),
            notify: None,
        }
    }

    /// Push then notify
    fn send(&self, message: &GffMessage) {
        if let Err(e) = self.queue.push(&message.to_bytes()) {
            warn!("{} dropped {}: {}", self.queue.name(), message.command(), e);
            return;
        }
        if let Some(tx) = &self.notify {
            let notice = OutboundNotice {
                queue: self.queue.clone(),
            };
            // A full channel already holds a pending notice for this queue
            if let Err(e) = tx.try_send(notice) {
                debug!("{} notice not sent: {}", self.queue.name(), e);
            }
        }
    }
}

/// Controller context
pub struct Controller {
    config: ControllerConfig,
    registry: DeviceRegistry,
    scenes: SceneManager,
    zones: ZoneRegistry,
    clock: Box<dyn Clock>,
    radio_inbound: SharedFrameQueue,
    ble_inbound: SharedFrameQueue,
    to_radio: Outbound,
    to_ble: Outbound,
    seconds_since_save: u32,
}

impl Controller {
    /// Create a controller reading the system clock
    pub fn new(config: ControllerConfig) -> Self {
        Self::with_clock(config, Box::new(SystemClock))
    }

    /// Create a controller with a custom clock
    pub fn with_clock(config: ControllerConfig, clock: Box<dyn Clock>) -> Self {
        let paths = config.paths();
        let queues = &config.queues;
        Self {
            registry: DeviceRegistry::new(config.registry_capacity).with_storage(&paths.dev_list),
            zones: ZoneRegistry::new(&paths.zones_dir),
            scenes: SceneManager::new(paths, config.provisioning.clone()),
            clock,
            radio_inbound: SharedFrameQueue::new("radio_in", queues.radio_inbound),
            ble_inbound: SharedFrameQueue::new("ble_in", queues.ble_inbound),
            to_radio: Outbound::new("to_radio", queues.radio_outbound),
            to_ble: Outbound::new("to_ble", queues.ble_outbound),
            seconds_since_save: 0,
            config,
        }
    }

    /// Restore persisted state
    pub fn start(&mut self) {
        match self.registry.restore() {
            Ok(count) => info!("{} devices restored", count),
            Err(e) if e.is_not_found() => info!("no device list stored"),
            Err(e) => error!("device list unusable: {}", e),
        }
        self.scenes.restore();
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut DeviceRegistry {
        &mut self.registry
    }

    pub fn scenes(&self) -> &SceneManager {
        &self.scenes
    }

    pub fn scenes_mut(&mut self) -> &mut SceneManager {
        &mut self.scenes
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    /// Queue the radio transport pushes into
    pub fn radio_inbound(&self) -> &SharedFrameQueue {
        &self.radio_inbound
    }

    /// Queue the BLE bridge pushes into
    pub fn ble_inbound(&self) -> &SharedFrameQueue {
        &self.ble_inbound
    }

    /// Frames for the radio side
    pub fn to_radio(&self) -> &SharedFrameQueue {
        &self.to_radio.queue
    }

    /// Frames for the BLE side
    pub fn to_ble(&self) -> &SharedFrameQueue {
        &self.to_ble.queue
    }

    /// Wake `tx` whenever frames are queued for the radio side
    pub fn notify_radio(&mut self, tx: mpsc::Sender<OutboundNotice>) {
        self.to_radio.notify = Some(tx);
    }

    /// Wake `tx` whenever frames are queued for the BLE side
    pub fn notify_ble(&mut self, tx: mpsc::Sender<OutboundNotice>) {
        self.to_ble.notify = Some(tx);
    }

    /// Process one message; returns false once the controller should stop
    pub fn handle(&mut self, message: ControllerMessage) -> bool {
        match message {
            ControllerMessage::RadioGffPending(queue) => self.drain(&queue, Origin::Radio),
            ControllerMessage::BleGffPending(queue) => self.drain(&queue, Origin::Ble),
            ControllerMessage::OneSecondTick => self.on_second(),
            ControllerMessage::FineTick { elapsed_ms } => {
                let out = self.scenes.tick_fine(elapsed_ms);
                self.route(out);
            }
            ControllerMessage::Shutdown => {
                info!("controller shutting down");
                self.persist();
                return false;
            }
        }
        true
    }

    /// Serve raw frame bytes from `origin` directly
    pub fn dispatch(&mut self, data: &[u8], origin: Origin) {
        let out = self.dispatcher().dispatch(data, origin);
        self.route(out);
    }

    fn dispatcher(&mut self) -> Dispatcher<'_> {
        Dispatcher {
            registry: &mut self.registry,
            scenes: &mut self.scenes,
            zones: &self.zones,
            clock: self.clock.as_ref(),
            alive_ttl: self.config.device_alive_ttl,
        }
    }

    fn drain(&mut self, queue: &SharedFrameQueue, origin: Origin) {
        loop {
            match queue.pop_frame() {
                Ok(Some(frame)) => self.dispatch(&frame, origin),
                Ok(None) => break,
                Err(e) => {
                    warn!("{} unreadable, clearing: {}", queue.name(), e);
                    queue.clear();
                    break;
                }
            }
        }
    }

    fn route(&self, envelopes: Vec<Envelope>) {
        for envelope in envelopes {
            let outbound = match envelope.target {
                Origin::Radio => &self.to_radio,
                Origin::Ble => &self.to_ble,
            };
            outbound.send(&envelope.message);
        }
    }

    fn on_second(&mut self) {
        let expired = self.registry.decrement_all_ttls();
        if !expired.is_empty() {
            debug!("{} devices expired", expired.len());
        }

        let period = self.config.dev_list_save_period_s;
        self.seconds_since_save += 1;
        if period > 0 && self.seconds_since_save >= period {
            self.seconds_since_save = 0;
            if let Err(e) = self.registry.save() {
                error!("cannot save device list: {}", e);
            }
        }

        self.scenes.tick_second();

        let actions = self
            .scenes
            .evaluate(false, None, &self.registry, self.clock.as_ref());
        self.route(actions_to_radio(actions));
    }

    fn persist(&self) {
        if let Err(e) = self.registry.save() {
            error!("cannot save device list: {}", e);
        }
        if let Err(e) = self.scenes.save() {
            error!("cannot save scenes: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{device_type, DeviceId};
    use crate::rule::{Action, Condition, Rule};
    use crate::scene::SceneName;
    use crate::time::{FixedClock, PackedTime};

    const SENSOR: DeviceId = DeviceId::new(3, 1, 0, device_type::ADC_SENSOR);
    const LAMP: DeviceId = DeviceId::new(3, 2, 0, device_type::ON_OFF_OUTPUT);

    fn controller(root: &std::path::Path) -> Controller {
        let mut config = ControllerConfig::with_storage_root(root);
        config.device_alive_ttl = 3;
        let mut controller = Controller::with_clock(
            config,
            Box::new(FixedClock::new(PackedTime::from_fields(2025, 6, 1, 12, 0, 0))),
        );
        controller.start();
        controller
    }

    fn pop_all(queue: &SharedFrameQueue) -> Vec<GffMessage> {
        let mut out = Vec::new();
        while let Some(frame) = queue.pop_frame().unwrap() {
            out.push(GffMessage::from_bytes(&frame).unwrap());
        }
        out
    }

    fn report(controller: &mut Controller, device_id: DeviceId, value: i16) {
        let inbound = controller.radio_inbound().clone();
        inbound
            .push(&GffMessage::SetDevVal { device_id, value }.to_bytes())
            .unwrap();
        assert!(controller.handle(ControllerMessage::RadioGffPending(inbound)));
    }

    #[test]
    fn test_ttl_expiry_on_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        report(&mut controller, SENSOR, 10);
        assert_eq!(controller.registry().len(), 1);

        controller.handle(ControllerMessage::OneSecondTick);
        controller.handle(ControllerMessage::OneSecondTick);
        assert_eq!(controller.registry().get_ttl(SENSOR), Some(1));
        controller.handle(ControllerMessage::OneSecondTick);
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_device_list_saved_periodically() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        controller.registry_mut().set_value(LAMP, 1).unwrap();
        controller.registry_mut().set_ttl(LAMP, 100).unwrap();

        for _ in 0..4 {
            controller.handle(ControllerMessage::OneSecondTick);
        }
        assert!(!dir.path().join("dev_lst").exists());
        controller.handle(ControllerMessage::OneSecondTick);

        let mut restored = DeviceRegistry::new(4);
        restored.restore_from(&dir.path().join("dev_lst")).unwrap();
        assert_eq!(restored.get_value(LAMP), Some(1));
        assert_eq!(restored.get_ttl(LAMP), Some(95));
    }

    #[test]
    fn test_ble_request_replied_on_ble() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        report(&mut controller, SENSOR, 42);

        let inbound = controller.ble_inbound().clone();
        inbound
            .push(&GffMessage::GetDevVal { device_id: SENSOR }.to_bytes())
            .unwrap();
        inbound.push(&GffMessage::GetNumOfDevs.to_bytes()).unwrap();
        controller.handle(ControllerMessage::BleGffPending(inbound));

        assert_eq!(
            pop_all(controller.to_ble()),
            vec![
                GffMessage::SetDevVal {
                    device_id: SENSOR,
                    value: 42
                },
                GffMessage::SetNumOfDevs { count: 1 },
            ]
        );
        assert!(pop_all(controller.to_radio()).is_empty());
    }

    #[test]
    fn test_time_rule_fires_on_tick() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        let rule = Rule::new(true)
            .with_input(Condition::InTimeRangeDaily {
                start: PackedTime::daily(11, 0, 0),
                end: PackedTime::daily(13, 0, 0),
            })
            .unwrap()
            .with_output(Action::set_device_value(LAMP, 1))
            .unwrap();
        controller
            .scenes_mut()
            .set_rule(&SceneName::default_scene(), 0, rule)
            .unwrap();

        // Device reports never trigger a time-only rule
        report(&mut controller, SENSOR, 1);
        assert!(pop_all(controller.to_radio()).is_empty());

        controller.handle(ControllerMessage::OneSecondTick);
        assert_eq!(
            pop_all(controller.to_radio()),
            vec![GffMessage::SetDevVal {
                device_id: LAMP,
                value: 1
            }]
        );
    }

    #[test]
    fn test_corrupt_queue_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        let inbound = controller.radio_inbound().clone();
        // Length byte promises more than is stored
        inbound.push(&[6, 0x00, 0x00, 1]).unwrap();
        controller.handle(ControllerMessage::RadioGffPending(inbound.clone()));
        assert_eq!(inbound.occupied_size(), 0);
        assert!(controller.registry().is_empty());
    }

    #[test]
    fn test_outbound_notice() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        let (tx, mut rx) = mpsc::channel(4);
        controller.notify_ble(tx);

        controller.dispatch(&GffMessage::GetNumOfDevs.to_bytes(), Origin::Ble);
        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.queue.name(), "to_ble");
        assert_eq!(pop_all(&notice.queue), vec![GffMessage::SetNumOfDevs { count: 0 }]);
    }

    #[test]
    fn test_shutdown_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        report(&mut controller, SENSOR, 7);
        assert!(!controller.handle(ControllerMessage::Shutdown));

        let restarted = self::controller(dir.path());
        assert_eq!(restarted.registry().get_value(SENSOR), Some(7));
    }
}
