// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Binary codec helpers
//!
//! Big-endian integer conversion used by every GFF payload, and the packed
//! 32-bit device identifier:
//!
//! ```text
//! [zone: 8] [node: 8] [endpoint: 8] [type: 8]
//! ```
//!
//! The byte helpers do no bounds checking beyond slice indexing; callers
//! validate payload lengths before decoding.

use std::fmt;

/// Decode a big-endian `u16` from the first two bytes of `buf`
#[inline]
pub fn u16_from_bytes(buf: &[u8]) -> u16 {
    u16::from_be_bytes([buf[0], buf[1]])
}

/// Decode a big-endian `u32` from the first four bytes of `buf`
#[inline]
pub fn u32_from_bytes(buf: &[u8]) -> u32 {
    u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Encode `value` big-endian into the first two bytes of `buf`
#[inline]
pub fn bytes_from_u16(value: u16, buf: &mut [u8]) {
    buf[..2].copy_from_slice(&value.to_be_bytes());
}

/// Encode `value` big-endian into the first four bytes of `buf`
#[inline]
pub fn bytes_from_u32(value: u32, buf: &mut [u8]) {
    buf[..4].copy_from_slice(&value.to_be_bytes());
}

/// Pack zone, node, endpoint and type into a raw 32-bit device id
#[inline]
pub const fn build_device_id(zone: u8, node: u8, endpoint: u8, device_type: u8) -> u32 {
    ((zone as u32) << 24) | ((node as u32) << 16) | ((endpoint as u32) << 8) | device_type as u32
}

/// Input or output class, taken from the top 2 bits of the device type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoClass {
    /// Sensors, buttons, switches
    Input,
    /// Bulbs, relays, servos
    Output,
    /// Class bits not assigned
    Unknown(u8),
}

impl fmt::Display for IoClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoClass::Input => write!(f, "in"),
            IoClass::Output => write!(f, "out"),
            IoClass::Unknown(bits) => write!(f, "?{}", bits),
        }
    }
}

/// Packed device identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub u32);

impl DeviceId {
    /// Reserved id marking an empty slot
    pub const NO_DEVICE: DeviceId = DeviceId(0x0000_0000);

    /// Build a device id from its fields
    pub const fn new(zone: u8, node: u8, endpoint: u8, device_type: u8) -> Self {
        Self(build_device_id(zone, node, endpoint, device_type))
    }

    /// Raw 32-bit value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Zone id
    #[inline]
    pub const fn zone(self) -> u8 {
        (self.0 >> 24) as u8
    }

    /// Node id within the zone
    #[inline]
    pub const fn node(self) -> u8 {
        (self.0 >> 16) as u8
    }

    /// Endpoint on the node
    #[inline]
    pub const fn endpoint(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Device type byte
    #[inline]
    pub const fn device_type(self) -> u8 {
        self.0 as u8
    }

    /// Unpack into `(zone, node, endpoint, type)`
    pub const fn unpack(self) -> (u8, u8, u8, u8) {
        (self.zone(), self.node(), self.endpoint(), self.device_type())
    }

    /// True for the empty-slot marker
    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == Self::NO_DEVICE.0
    }

    /// Input/output class of the device
    pub fn io_class(self) -> IoClass {
        match self.device_type() >> 6 {
            0 => IoClass::Input,
            1 => IoClass::Output,
            bits => IoClass::Unknown(bits),
        }
    }

    /// Human-readable name of the device type
    pub fn type_name(self) -> &'static str {
        device_type_name(self.device_type())
    }
}

impl From<u32> for DeviceId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<DeviceId> for u32 {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Known device types
pub mod device_type {
    /// Empty slot
    pub const NO_DEVICE: u8 = 0x00;
    /// On/off switch
    pub const SWITCH: u8 = 0x01;
    /// Push button
    pub const BUTTON: u8 = 0x02;
    /// Rotary dimmer
    pub const DIMMER: u8 = 0x03;
    /// Linear ADC sensor (temperature, light, gas, moisture)
    pub const ADC_SENSOR: u8 = 0x30;
    /// Event sensor (PIR)
    pub const EVT_SENSOR: u8 = 0x38;
    /// Dimmable bulb
    pub const LEVEL_BULB: u8 = 0x42;
    /// RGB LED
    pub const RGB_LED: u8 = 0x43;
    /// SG90 servo
    pub const SERVO_SG90: u8 = 0x44;
    /// On/off output (bulb, buzzer)
    pub const ON_OFF_OUTPUT: u8 = 0x78;
}

/// Name of a device type byte, `"unknown"` when not recognised
pub fn device_type_name(device_type: u8) -> &'static str {
    match device_type {
        device_type::NO_DEVICE => "no device",
        device_type::SWITCH => "switch",
        device_type::BUTTON => "button",
        device_type::DIMMER => "dimmer",
        device_type::ADC_SENSOR => "adc sensor",
        device_type::EVT_SENSOR => "event sensor",
        device_type::LEVEL_BULB => "level bulb",
        device_type::RGB_LED => "rgb led",
        device_type::SERVO_SG90 => "servo sg90",
        device_type::ON_OFF_OUTPUT => "on/off output",
        _ => "unknown",
    }
}
