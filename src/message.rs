// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Typed GFF messages
//!
//! [`GffMessage`] gives every command its decoded payload. Decoding checks
//! the payload length for the command before reading any field.
//!
//! Wildcard indexes request every entry: `0xFFFFFFFF` for devices, `0xFF`
//! for scene names and zones, `0xFFFF` for rules.

use crate::codec::{bytes_from_u16, bytes_from_u32, u16_from_bytes, u32_from_bytes, DeviceId};
use crate::error::FrameError;
use crate::frame::{Command, GffFrame};
use crate::rule::{Rule, RULE_WIRE_SIZE};
use crate::scene::{SceneName, SCENE_NAME_SIZE};
use crate::zone::{truncate_name, ZONE_NAME_SIZE};

/// Device index requesting every device
pub const ALL_DEVICES: u32 = 0xFFFF_FFFF;
/// Scene index requesting every scene name
pub const ALL_SCENES: u8 = 0xFF;
/// Rule index requesting every rule
pub const ALL_RULES: u16 = 0xFFFF;

/// Side a frame came from or goes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// 6LoWPAN radio network
    Radio,
    /// BLE configurator bridge
    Ble,
}

/// Message addressed to one side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub target: Origin,
    pub message: GffMessage,
}

impl Envelope {
    pub fn new(target: Origin, message: GffMessage) -> Self {
        Self { target, message }
    }
}

/// Decoded GFF message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GffMessage {
    SetDevVal { device_id: DeviceId, value: i16 },
    SetNumOfDevs { count: u32 },
    SetDevWithIndex { index: u32, device_id: DeviceId, value: i16 },
    SetNumOfScenes { active: u8, inactive: u8 },
    SetActSceneName { index: u8, name: SceneName },
    SetInactSceneName { index: u8, name: SceneName },
    SetNumOfRules { scene: SceneName, count: u16 },
    SetRuleWithIndex { scene: SceneName, index: u16, rule: Rule },
    SetZoneName { zone: u8, name: String },
    SetNewScene { scene: SceneName },
    SetRemoveScene { scene: SceneName },
    SetRenameInactScene { old: SceneName, new: SceneName },

    GetDevVal { device_id: DeviceId },
    GetNumOfDevs,
    GetDevWithIndex { index: u32 },
    GetNumOfScenes,
    GetActSceneName { index: u8 },
    GetInactSceneName { index: u8 },
    GetNumOfRules { scene: SceneName },
    GetRuleWithIndex { scene: SceneName, index: u16 },
    GetZoneName { zone: u8 },

    Alive { device_id: DeviceId },
}

fn scene_at(command: Command, payload: &[u8], offset: usize) -> Result<SceneName, FrameError> {
    SceneName::from_field(&payload[offset..offset + SCENE_NAME_SIZE]).map_err(|e| {
        FrameError::Malformed {
            command,
            reason: e.to_string(),
        }
    })
}

impl GffMessage {
    /// Command code of this message
    pub fn command(&self) -> Command {
        match self {
            GffMessage::SetDevVal { .. } => Command::SetDevVal,
            GffMessage::SetNumOfDevs { .. } => Command::SetNumOfDevs,
            GffMessage::SetDevWithIndex { .. } => Command::SetDevWithIndexs,
            GffMessage::SetNumOfScenes { .. } => Command::SetNumOfScenes,
            GffMessage::SetActSceneName { .. } => Command::SetActSceneNameWithIndexs,
            GffMessage::SetInactSceneName { .. } => Command::SetInactSceneNameWithIndexs,
            GffMessage::SetNumOfRules { .. } => Command::SetNumOfRules,
            GffMessage::SetRuleWithIndex { .. } => Command::SetRuleWithIndexs,
            GffMessage::SetZoneName { .. } => Command::SetZoneName,
            GffMessage::SetNewScene { .. } => Command::SetNewScene,
            GffMessage::SetRemoveScene { .. } => Command::SetRemoveScene,
            GffMessage::SetRenameInactScene { .. } => Command::SetRenameInactScene,
            GffMessage::GetDevVal { .. } => Command::GetDevVal,
            GffMessage::GetNumOfDevs => Command::GetNumOfDevs,
            GffMessage::GetDevWithIndex { .. } => Command::GetDevWithIndexs,
            GffMessage::GetNumOfScenes => Command::GetNumOfScenes,
            GffMessage::GetActSceneName { .. } => Command::GetActSceneNameWithIndexs,
            GffMessage::GetInactSceneName { .. } => Command::GetInactSceneNameWithIndexs,
            GffMessage::GetNumOfRules { .. } => Command::GetNumOfRules,
            GffMessage::GetRuleWithIndex { .. } => Command::GetRuleWithIndexs,
            GffMessage::GetZoneName { .. } => Command::GetZoneName,
            GffMessage::Alive { .. } => Command::Alive,
        }
    }

    /// Decode a frame's payload
    pub fn decode(frame: &GffFrame) -> Result<Self, FrameError> {
        let command = frame.command();
        let p = frame.expect_payload_len()?;

        let message = match command {
            Command::SetDevVal => GffMessage::SetDevVal {
                device_id: DeviceId(u32_from_bytes(p)),
                value: u16_from_bytes(&p[4..]) as i16,
            },
            Command::SetNumOfDevs => GffMessage::SetNumOfDevs {
                count: u32_from_bytes(p),
            },
            Command::SetDevWithIndexs => GffMessage::SetDevWithIndex {
                index: u32_from_bytes(p),
                device_id: DeviceId(u32_from_bytes(&p[4..])),
                value: u16_from_bytes(&p[8..]) as i16,
            },
            Command::SetNumOfScenes => GffMessage::SetNumOfScenes {
                active: p[0],
                inactive: p[1],
            },
            Command::SetActSceneNameWithIndexs => GffMessage::SetActSceneName {
                index: p[0],
                name: scene_at(command, p, 1)?,
            },
            Command::SetInactSceneNameWithIndexs => GffMessage::SetInactSceneName {
                index: p[0],
                name: scene_at(command, p, 1)?,
            },
            Command::SetNumOfRules => GffMessage::SetNumOfRules {
                scene: scene_at(command, p, 0)?,
                count: u16_from_bytes(&p[8..]),
            },
            Command::SetRuleWithIndexs => GffMessage::SetRuleWithIndex {
                scene: scene_at(command, p, 0)?,
                index: u16_from_bytes(&p[8..]),
                rule: Rule::decode_wire(&p[10..]).map_err(|e| FrameError::Malformed {
                    command,
                    reason: e.to_string(),
                })?,
            },
            Command::SetZoneName => {
                let field = &p[1..1 + ZONE_NAME_SIZE];
                let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
                let name = std::str::from_utf8(&field[..end]).map_err(|_| FrameError::Malformed {
                    command,
                    reason: "zone name is not UTF-8".to_string(),
                })?;
                GffMessage::SetZoneName {
                    zone: p[0],
                    name: name.to_string(),
                }
            }
            Command::SetNewScene => GffMessage::SetNewScene {
                scene: scene_at(command, p, 0)?,
            },
            Command::SetRemoveScene => GffMessage::SetRemoveScene {
                scene: scene_at(command, p, 0)?,
            },
            Command::SetRenameInactScene => GffMessage::SetRenameInactScene {
                old: scene_at(command, p, 0)?,
                new: scene_at(command, p, SCENE_NAME_SIZE)?,
            },
            Command::GetDevVal => GffMessage::GetDevVal {
                device_id: DeviceId(u32_from_bytes(p)),
            },
            Command::GetNumOfDevs => GffMessage::GetNumOfDevs,
            Command::GetDevWithIndexs => GffMessage::GetDevWithIndex {
                index: u32_from_bytes(p),
            },
            Command::GetNumOfScenes => GffMessage::GetNumOfScenes,
            Command::GetActSceneNameWithIndexs => GffMessage::GetActSceneName { index: p[0] },
            Command::GetInactSceneNameWithIndexs => GffMessage::GetInactSceneName { index: p[0] },
            Command::GetNumOfRules => GffMessage::GetNumOfRules {
                scene: scene_at(command, p, 0)?,
            },
            Command::GetRuleWithIndexs => GffMessage::GetRuleWithIndex {
                scene: scene_at(command, p, 0)?,
                index: u16_from_bytes(&p[8..]),
            },
            Command::GetZoneName => GffMessage::GetZoneName { zone: p[0] },
            Command::Alive => GffMessage::Alive {
                device_id: DeviceId(u32_from_bytes(p)),
            },
        };
        Ok(message)
    }

    /// Parse and decode raw frame bytes
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        Self::decode(&GffFrame::from_bytes(data)?)
    }

    /// Encode into a frame
    pub fn encode(&self) -> GffFrame {
        let command = self.command();
        let mut p = vec![0u8; command.payload_len()];

        match self {
            GffMessage::SetDevVal { device_id, value } => {
                bytes_from_u32(device_id.raw(), &mut p);
                bytes_from_u16(*value as u16, &mut p[4..]);
            }
            GffMessage::SetNumOfDevs { count } => bytes_from_u32(*count, &mut p),
            GffMessage::SetDevWithIndex {
                index,
                device_id,
                value,
            } => {
                bytes_from_u32(*index, &mut p);
                bytes_from_u32(device_id.raw(), &mut p[4..]);
                bytes_from_u16(*value as u16, &mut p[8..]);
            }
            GffMessage::SetNumOfScenes { active, inactive } => {
                p[0] = *active;
                p[1] = *inactive;
            }
            GffMessage::SetActSceneName { index, name }
            | GffMessage::SetInactSceneName { index, name } => {
                p[0] = *index;
                p[1..].copy_from_slice(&name.to_field());
            }
            GffMessage::SetNumOfRules { scene, count } => {
                p[..SCENE_NAME_SIZE].copy_from_slice(&scene.to_field());
                bytes_from_u16(*count, &mut p[8..]);
            }
            GffMessage::SetRuleWithIndex { scene, index, rule } => {
                p[..SCENE_NAME_SIZE].copy_from_slice(&scene.to_field());
                bytes_from_u16(*index, &mut p[8..]);
                rule.encode_wire(&mut p[10..10 + RULE_WIRE_SIZE]);
            }
            GffMessage::SetZoneName { zone, name } => {
                p[0] = *zone;
                let name = truncate_name(name).as_bytes();
                p[1..1 + name.len()].copy_from_slice(name);
            }
            GffMessage::SetNewScene { scene }
            | GffMessage::SetRemoveScene { scene }
            | GffMessage::GetNumOfRules { scene } => {
                p.copy_from_slice(&scene.to_field());
            }
            GffMessage::SetRenameInactScene { old, new } => {
                p[..SCENE_NAME_SIZE].copy_from_slice(&old.to_field());
                p[SCENE_NAME_SIZE..].copy_from_slice(&new.to_field());
            }
            GffMessage::GetDevVal { device_id } | GffMessage::Alive { device_id } => {
                bytes_from_u32(device_id.raw(), &mut p);
            }
            GffMessage::GetNumOfDevs | GffMessage::GetNumOfScenes => {}
            GffMessage::GetDevWithIndex { index } => bytes_from_u32(*index, &mut p),
            GffMessage::GetActSceneName { index } | GffMessage::GetInactSceneName { index } => {
                p[0] = *index;
            }
            GffMessage::GetRuleWithIndex { scene, index } => {
                p[..SCENE_NAME_SIZE].copy_from_slice(&scene.to_field());
                bytes_from_u16(*index, &mut p[8..]);
            }
            GffMessage::GetZoneName { zone } => p[0] = *zone,
        }

        GffFrame::with_fixed_payload(command, p)
    }

    /// Encode straight to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode().to_bytes()
    }
}
