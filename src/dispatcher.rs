// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! GFF dispatcher
//!
//! Decodes one inbound frame and applies it to the registry, the scene
//! manager and the zone store. Replies and scene actions come back as
//! [`Envelope`]s for the caller to queue. Frames that fail to decode are
//! logged and dropped; the protocol has no negative acknowledgement.

use log::{debug, warn};

use crate::codec::DeviceId;
use crate::message::{Envelope, GffMessage, Origin, ALL_DEVICES, ALL_RULES, ALL_SCENES};
use crate::registry::{DeviceRecord, DeviceRegistry};
use crate::rule::Action;
use crate::scene_manager::SceneManager;
use crate::time::Clock;
use crate::zone::{ZoneRegistry, ALL_ZONES};

/// Borrowed view of the controller state needed to serve one frame
pub struct Dispatcher<'a> {
    pub registry: &'a mut DeviceRegistry,
    pub scenes: &'a mut SceneManager,
    pub zones: &'a ZoneRegistry,
    pub clock: &'a dyn Clock,
    /// TTL given to a device on every report or keep-alive
    pub alive_ttl: i16,
}

impl<'a> Dispatcher<'a> {
    /// Decode and serve raw frame bytes from `origin`
    pub fn dispatch(&mut self, data: &[u8], origin: Origin) -> Vec<Envelope> {
        match GffMessage::from_bytes(data) {
            Ok(message) => {
                debug!("{:?} -> {:?}", origin, message);
                self.handle(message, origin)
            }
            Err(e) => {
                warn!("dropping frame from {:?}: {}", origin, e);
                Vec::new()
            }
        }
    }

    /// Serve a decoded message from `origin`
    pub fn handle(&mut self, message: GffMessage, origin: Origin) -> Vec<Envelope> {
        let reply = |message| vec![Envelope::new(origin, message)];

        match message {
            GffMessage::SetDevVal { device_id, value } => match origin {
                Origin::Radio => self.on_report(device_id, value),
                Origin::Ble => vec![Envelope::new(Origin::Radio, message)],
            },
            GffMessage::Alive { device_id } => {
                if self.registry.set_ttl(device_id, self.alive_ttl).is_err() {
                    debug!("ALIVE from unknown device {}", device_id);
                }
                Vec::new()
            }

            GffMessage::GetDevVal { device_id } => match self.registry.get_value(device_id) {
                Some(value) => reply(GffMessage::SetDevVal { device_id, value }),
                None => {
                    debug!("GET_DEV_VAL for unknown device {}", device_id);
                    Vec::new()
                }
            },
            GffMessage::GetNumOfDevs => reply(GffMessage::SetNumOfDevs {
                count: self.registry.len() as u32,
            }),
            GffMessage::GetDevWithIndex { index } => self.device_listing(index, origin),

            GffMessage::GetNumOfScenes => match self.scenes.inactive_scenes() {
                Ok(inactive) => reply(GffMessage::SetNumOfScenes {
                    active: self.scenes.active().is_some() as u8,
                    inactive: inactive.len().min(u8::MAX as usize) as u8,
                }),
                Err(e) => {
                    warn!("cannot list scenes: {}", e);
                    Vec::new()
                }
            },
            GffMessage::GetActSceneName { index } => match self.scenes.active() {
                Some(name) if index == 0 || index == ALL_SCENES => {
                    reply(GffMessage::SetActSceneName {
                        index: 0,
                        name: name.clone(),
                    })
                }
                _ => Vec::new(),
            },
            GffMessage::GetInactSceneName { index } => self.inactive_listing(index, origin),
            GffMessage::SetActSceneName { name, .. } => {
                if self.scenes.is_provisioning() {
                    debug!("activation of {} dropped while provisioning", name);
                } else if let Err(e) = self.scenes.activate_scene(&name) {
                    warn!("cannot activate scene {}: {}", name, e);
                }
                Vec::new()
            }
            GffMessage::SetRemoveScene { scene } => {
                if let Err(e) = self.scenes.remove_scene(&scene) {
                    warn!("cannot remove scene {}: {}", scene, e);
                }
                Vec::new()
            }
            GffMessage::SetRenameInactScene { old, new } => {
                if let Err(e) = self.scenes.rename_scene(&old, &new) {
                    warn!("cannot rename scene {} to {}: {}", old, new, e);
                }
                Vec::new()
            }

            GffMessage::SetNewScene { scene } => self.scenes.begin_provisioning(scene, origin),
            GffMessage::SetNumOfRules { scene, count } => self.scenes.on_rule_count(&scene, count),
            GffMessage::SetRuleWithIndex { scene, index, rule } => {
                if let Err(e) = self.scenes.set_rule(&scene, index as usize, rule) {
                    warn!("rule {} of {} dropped: {}", index, scene, e);
                }
                Vec::new()
            }
            GffMessage::GetNumOfRules { scene } => match self.scenes.scene(&scene) {
                Ok(s) => reply(GffMessage::SetNumOfRules {
                    count: s.num_valid_rules() as u16,
                    scene,
                }),
                Err(e) => {
                    warn!("GET_NUM_OF_RULES {}: {}", scene, e);
                    Vec::new()
                }
            },
            GffMessage::GetRuleWithIndex { scene, index } => {
                let s = match self.scenes.scene(&scene) {
                    Ok(s) => s,
                    Err(e) => {
                        warn!("GET_RULE_WITH_INDEXS {}: {}", scene, e);
                        return Vec::new();
                    }
                };
                if index == ALL_RULES {
                    return s
                        .valid_rules()
                        .map(|(i, rule)| {
                            Envelope::new(
                                origin,
                                GffMessage::SetRuleWithIndex {
                                    scene: scene.clone(),
                                    index: i as u16,
                                    rule: rule.clone(),
                                },
                            )
                        })
                        .collect();
                }
                match s.get_rule(index as usize) {
                    Ok(rule) => reply(GffMessage::SetRuleWithIndex {
                        rule: rule.clone(),
                        scene: scene.clone(),
                        index,
                    }),
                    Err(e) => {
                        debug!("GET_RULE_WITH_INDEXS {} {}: {}", scene, index, e);
                        Vec::new()
                    }
                }
            }

            GffMessage::SetZoneName { zone, name } => {
                if let Err(e) = self.zones.set_name(zone, &name) {
                    warn!("cannot name zone {:x}: {}", zone, e);
                }
                Vec::new()
            }
            GffMessage::GetZoneName { zone } => self.zone_listing(zone, origin),

            GffMessage::SetNumOfDevs { .. }
            | GffMessage::SetDevWithIndex { .. }
            | GffMessage::SetNumOfScenes { .. }
            | GffMessage::SetInactSceneName { .. } => {
                debug!("{} from {:?} ignored", message.command(), origin);
                Vec::new()
            }
        }
    }

    /// Device report from the radio side
    ///
    /// Scenes see the new value through `report` while the registry still
    /// holds the old one.
    fn on_report(&mut self, device_id: DeviceId, value: i16) -> Vec<Envelope> {
        let report = DeviceRecord {
            device_id,
            value,
            ttl: self.alive_ttl,
        };
        let actions = self
            .scenes
            .evaluate(true, Some(&report), self.registry, self.clock);

        let stored = self
            .registry
            .set_value(device_id, value)
            .and_then(|_| self.registry.set_ttl(device_id, self.alive_ttl));
        if let Err(e) = stored {
            warn!("report from {} not stored: {}", device_id, e);
        }

        actions_to_radio(actions)
    }

    fn device_listing(&mut self, index: u32, origin: Origin) -> Vec<Envelope> {
        self.registry.compact();
        let entry = |(i, record): (usize, &DeviceRecord)| {
            Envelope::new(
                origin,
                GffMessage::SetDevWithIndex {
                    index: i as u32,
                    device_id: record.device_id,
                    value: record.value,
                },
            )
        };

        if index == ALL_DEVICES {
            return self.registry.iter().enumerate().map(entry).collect();
        }
        self.registry
            .get_by_index(index as usize)
            .map(|record| entry((index as usize, record)))
            .into_iter()
            .collect()
    }

    fn inactive_listing(&self, index: u8, origin: Origin) -> Vec<Envelope> {
        let names = match self.scenes.inactive_scenes() {
            Ok(names) => names,
            Err(e) => {
                warn!("cannot list scenes: {}", e);
                return Vec::new();
            }
        };
        names
            .into_iter()
            .enumerate()
            .filter(|(i, _)| index == ALL_SCENES || *i == index as usize)
            .map(|(i, name)| {
                Envelope::new(
                    origin,
                    GffMessage::SetInactSceneName {
                        index: i as u8,
                        name,
                    },
                )
            })
            .collect()
    }

    fn zone_listing(&self, zone: u8, origin: Origin) -> Vec<Envelope> {
        let zones = if zone == ALL_ZONES {
            self.zones.list()
        } else {
            self.zones
                .get_name(zone)
                .map(|name| name.map(|name| (zone, name)).into_iter().collect())
        };
        match zones {
            Ok(zones) => zones
                .into_iter()
                .map(|(zone, name)| Envelope::new(origin, GffMessage::SetZoneName { zone, name }))
                .collect(),
            Err(e) => {
                warn!("cannot read zone names: {}", e);
                Vec::new()
            }
        }
    }
}

/// Turn scene actions into `SET_DEV_VAL` commands for the radio side
pub fn actions_to_radio(actions: Vec<Action>) -> Vec<Envelope> {
    actions
        .into_iter()
        .map(|action| {
            Envelope::new(
                Origin::Radio,
                GffMessage::SetDevVal {
                    device_id: action.device_id,
                    value: action.value,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::device_type;
    use crate::config::{ProvisioningConfig, StoragePaths};
    use crate::frame::{Command, GffFrame};
    use crate::rule::{CompareOp, Condition, Rule};
    use crate::scene::SceneName;
    use crate::time::FixedClock;
    use std::path::Path;

    const BUTTON: DeviceId = DeviceId::new(1, 1, 0, device_type::BUTTON);
    const LAMP: DeviceId = DeviceId::new(1, 2, 0, device_type::ON_OFF_OUTPUT);

    struct Fixture {
        registry: DeviceRegistry,
        scenes: SceneManager,
        zones: ZoneRegistry,
        clock: FixedClock,
    }

    impl Fixture {
        fn new(root: &Path) -> Self {
            let paths = StoragePaths::new(root);
            let mut scenes = SceneManager::new(paths.clone(), ProvisioningConfig::default());
            scenes.restore();
            Self {
                registry: DeviceRegistry::new(8),
                scenes,
                zones: ZoneRegistry::new(paths.zones_dir),
                clock: FixedClock::default(),
            }
        }

        fn dispatcher(&mut self) -> Dispatcher<'_> {
            Dispatcher {
                registry: &mut self.registry,
                scenes: &mut self.scenes,
                zones: &self.zones,
                clock: &self.clock,
                alive_ttl: 30,
            }
        }

        fn send(&mut self, message: GffMessage, origin: Origin) -> Vec<Envelope> {
            let bytes = message.to_bytes();
            self.dispatcher().dispatch(&bytes, origin)
        }
    }

    fn name(s: &str) -> SceneName {
        SceneName::new(s).unwrap()
    }

    fn press_rule() -> Rule {
        Rule::new(true)
            .with_input(Condition::Compare {
                op: CompareOp::Equal,
                device_id: BUTTON,
                value: 1,
            })
            .unwrap()
            .with_output(Action::set_device_value(LAMP, 100))
            .unwrap()
    }

    #[test]
    fn test_radio_report_stores_value() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let out = fx.send(
            GffMessage::SetDevVal {
                device_id: BUTTON,
                value: 0,
            },
            Origin::Radio,
        );
        assert!(out.is_empty());
        assert_eq!(fx.registry.get_value(BUTTON), Some(0));
        assert_eq!(fx.registry.get_ttl(BUTTON), Some(30));
    }

    #[test]
    fn test_report_fires_default_scene() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        fx.scenes
            .set_rule(&SceneName::default_scene(), 0, press_rule())
            .unwrap();

        let out = fx.send(
            GffMessage::SetDevVal {
                device_id: BUTTON,
                value: 1,
            },
            Origin::Radio,
        );
        assert_eq!(
            out,
            vec![Envelope::new(
                Origin::Radio,
                GffMessage::SetDevVal {
                    device_id: LAMP,
                    value: 100
                }
            )]
        );
    }

    #[test]
    fn test_ble_set_dev_val_forwarded() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let command = GffMessage::SetDevVal {
            device_id: LAMP,
            value: 1,
        };
        let out = fx.send(command.clone(), Origin::Ble);
        assert_eq!(out, vec![Envelope::new(Origin::Radio, command)]);
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_alive_refreshes_known_device() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        fx.registry.set_value(LAMP, 0).unwrap();
        fx.registry.set_ttl(LAMP, 2).unwrap();

        fx.send(GffMessage::Alive { device_id: LAMP }, Origin::Radio);
        assert_eq!(fx.registry.get_ttl(LAMP), Some(30));

        fx.send(GffMessage::Alive { device_id: BUTTON }, Origin::Radio);
        assert_eq!(fx.registry.get_record(BUTTON), None);
    }

    #[test]
    fn test_device_queries() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        fx.registry.set_value(BUTTON, 1).unwrap();
        fx.registry.set_value(LAMP, 7).unwrap();
        fx.registry.remove(BUTTON).unwrap();
        fx.registry.set_value(BUTTON, 3).unwrap();

        let out = fx.send(GffMessage::GetDevVal { device_id: LAMP }, Origin::Ble);
        assert_eq!(
            out[0].message,
            GffMessage::SetDevVal {
                device_id: LAMP,
                value: 7
            }
        );

        let out = fx.send(GffMessage::GetNumOfDevs, Origin::Ble);
        assert_eq!(out[0].message, GffMessage::SetNumOfDevs { count: 2 });

        let out = fx.send(GffMessage::GetDevWithIndex { index: ALL_DEVICES }, Origin::Ble);
        assert_eq!(out.len(), 2);
        let indexes: Vec<_> = out
            .iter()
            .map(|e| match e.message {
                GffMessage::SetDevWithIndex { index, .. } => index,
                _ => u32::MAX,
            })
            .collect();
        assert_eq!(indexes, vec![0, 1]);

        assert!(fx
            .send(GffMessage::GetDevWithIndex { index: 5 }, Origin::Ble)
            .is_empty());
    }

    #[test]
    fn test_malformed_frames_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());

        // Short payload, unknown command, truncated frame
        let short = GffFrame::new(Command::SetDevVal, vec![0; 5]).unwrap().to_bytes();
        for bytes in [short, vec![0, 0x0F, 0x0F], vec![9, 0x00, 0x00, 1]] {
            assert!(fx.dispatcher().dispatch(&bytes, Origin::Radio).is_empty());
        }
        assert!(fx.registry.is_empty());
    }

    #[test]
    fn test_provisioning_over_gff() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());

        let out = fx.send(GffMessage::SetNewScene { scene: name("testA") }, Origin::Ble);
        assert_eq!(
            out,
            vec![Envelope::new(
                Origin::Ble,
                GffMessage::GetNumOfRules {
                    scene: name("testA")
                }
            )]
        );

        let out = fx.send(
            GffMessage::SetNumOfRules {
                scene: name("testA"),
                count: 1,
            },
            Origin::Ble,
        );
        assert_eq!(out.len(), 1);

        fx.send(
            GffMessage::SetRuleWithIndex {
                scene: name("testA"),
                index: 0,
                rule: press_rule(),
            },
            Origin::Ble,
        );
        let out = fx.scenes.tick_fine(1000);
        assert_eq!(
            out[0].message,
            GffMessage::SetNewScene {
                scene: name("testA")
            }
        );

        // Activation is explicit
        assert_eq!(fx.scenes.active(), None);
        fx.send(
            GffMessage::SetActSceneName {
                index: 0,
                name: name("testA"),
            },
            Origin::Ble,
        );
        assert_eq!(fx.scenes.active(), Some(&name("testA")));

        let out = fx.send(GffMessage::GetActSceneName { index: 0 }, Origin::Ble);
        assert_eq!(
            out[0].message,
            GffMessage::SetActSceneName {
                index: 0,
                name: name("testA")
            }
        );
    }

    #[test]
    fn test_scene_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        for scene in ["night", "away"] {
            fx.send(GffMessage::SetNewScene { scene: name(scene) }, Origin::Ble);
            fx.send(
                GffMessage::SetNumOfRules {
                    scene: name(scene),
                    count: 0,
                },
                Origin::Ble,
            );
            fx.scenes.tick_fine(1);
        }

        let out = fx.send(GffMessage::GetNumOfScenes, Origin::Ble);
        assert_eq!(
            out[0].message,
            GffMessage::SetNumOfScenes {
                active: 0,
                inactive: 2
            }
        );

        let out = fx.send(GffMessage::GetInactSceneName { index: ALL_SCENES }, Origin::Ble);
        assert_eq!(
            out.into_iter().map(|e| e.message).collect::<Vec<_>>(),
            vec![
                GffMessage::SetInactSceneName {
                    index: 0,
                    name: name("away")
                },
                GffMessage::SetInactSceneName {
                    index: 1,
                    name: name("night")
                },
            ]
        );

        fx.send(
            GffMessage::SetRenameInactScene {
                old: name("away"),
                new: name("holiday"),
            },
            Origin::Ble,
        );
        fx.send(GffMessage::SetRemoveScene { scene: name("night") }, Origin::Ble);
        let out = fx.send(GffMessage::GetInactSceneName { index: 0 }, Origin::Ble);
        assert_eq!(
            out[0].message,
            GffMessage::SetInactSceneName {
                index: 0,
                name: name("holiday")
            }
        );
    }

    #[test]
    fn test_rule_queries() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        let default = SceneName::default_scene();
        fx.send(
            GffMessage::SetRuleWithIndex {
                scene: default.clone(),
                index: 2,
                rule: press_rule(),
            },
            Origin::Ble,
        );

        let out = fx.send(GffMessage::GetNumOfRules { scene: default.clone() }, Origin::Ble);
        assert_eq!(
            out[0].message,
            GffMessage::SetNumOfRules {
                scene: default.clone(),
                count: 1
            }
        );

        let out = fx.send(
            GffMessage::GetRuleWithIndex {
                scene: default.clone(),
                index: ALL_RULES,
            },
            Origin::Ble,
        );
        assert_eq!(
            out,
            vec![Envelope::new(
                Origin::Ble,
                GffMessage::SetRuleWithIndex {
                    scene: default.clone(),
                    index: 2,
                    rule: press_rule()
                }
            )]
        );

        assert!(fx
            .send(
                GffMessage::GetRuleWithIndex {
                    scene: default,
                    index: 0
                },
                Origin::Ble
            )
            .is_empty());
        assert!(fx
            .send(GffMessage::GetNumOfRules { scene: name("ghost") }, Origin::Ble)
            .is_empty());
    }

    #[test]
    fn test_zone_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut fx = Fixture::new(dir.path());
        fx.send(
            GffMessage::SetZoneName {
                zone: 2,
                name: "garage".to_string(),
            },
            Origin::Ble,
        );
        fx.send(
            GffMessage::SetZoneName {
                zone: 1,
                name: "hall".to_string(),
            },
            Origin::Ble,
        );

        let out = fx.send(GffMessage::GetZoneName { zone: 2 }, Origin::Ble);
        assert_eq!(
            out[0].message,
            GffMessage::SetZoneName {
                zone: 2,
                name: "garage".to_string()
            }
        );

        let out = fx.send(GffMessage::GetZoneName { zone: ALL_ZONES }, Origin::Ble);
        assert_eq!(out.len(), 2);
        assert!(fx
            .send(GffMessage::GetZoneName { zone: 9 }, Origin::Ble)
            .is_empty());
    }
}
