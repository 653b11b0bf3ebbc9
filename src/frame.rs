// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Generic Frame Format
//!
//! Every message between the coordinator, the radio nodes and the BLE
//! configurator travels as one GFF frame.
//!
//! # Frame Format
//!
//! ```text
//! [len: 1] [cmd: 2 BE] [payload: len]
//! ```
//!
//! `GET_*` commands are their `SET_*` counterpart with bit 8 set.

use std::fmt;

use crate::codec::{bytes_from_u16, u16_from_bytes};
use crate::error::FrameError;

/// Size of the length field
pub const GFF_LEN_SIZE: usize = 1;
/// Size of the command field
pub const GFF_CMD_SIZE: usize = 2;
/// Length byte + command
pub const GFF_HEADER_SIZE: usize = GFF_LEN_SIZE + GFF_CMD_SIZE;
/// Largest payload
pub const GFF_MAX_DATA_SIZE: usize = 255;
/// Largest encoded frame
pub const GFF_MAX_FRAME_SIZE: usize = GFF_HEADER_SIZE + GFF_MAX_DATA_SIZE;

/// Offset of the length byte
pub const GFF_LEN_POS: usize = 0;
/// Offset of the command
pub const GFF_CMD_POS: usize = GFF_LEN_POS + GFF_LEN_SIZE;
/// Offset of the payload
pub const GFF_DATA_POS: usize = GFF_CMD_POS + GFF_CMD_SIZE;

/// Bit distinguishing `GET_*` from `SET_*`
pub const GET_FLAG: u16 = 0x0100;

/// GFF command codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    SetDevVal = 0x0000,
    SetNumOfDevs = 0x0001,
    SetDevWithIndexs = 0x0002,
    SetNumOfScenes = 0x0003,
    SetActSceneNameWithIndexs = 0x0004,
    SetInactSceneNameWithIndexs = 0x0005,
    SetNumOfRules = 0x0006,
    SetRuleWithIndexs = 0x0007,
    SetZoneName = 0x0008,
    SetNewScene = 0x0009,
    SetRemoveScene = 0x000A,
    SetRenameInactScene = 0x000B,

    GetDevVal = 0x0100,
    GetNumOfDevs = 0x0101,
    GetDevWithIndexs = 0x0102,
    GetNumOfScenes = 0x0103,
    GetActSceneNameWithIndexs = 0x0104,
    GetInactSceneNameWithIndexs = 0x0105,
    GetNumOfRules = 0x0106,
    GetRuleWithIndexs = 0x0107,
    GetZoneName = 0x0108,

    Alive = 0x0200,
}

impl Command {
    /// Every known command
    pub const ALL: [Command; 22] = [
        Command::SetDevVal,
        Command::SetNumOfDevs,
        Command::SetDevWithIndexs,
        Command::SetNumOfScenes,
        Command::SetActSceneNameWithIndexs,
        Command::SetInactSceneNameWithIndexs,
        Command::SetNumOfRules,
        Command::SetRuleWithIndexs,
        Command::SetZoneName,
        Command::SetNewScene,
        Command::SetRemoveScene,
        Command::SetRenameInactScene,
        Command::GetDevVal,
        Command::GetNumOfDevs,
        Command::GetDevWithIndexs,
        Command::GetNumOfScenes,
        Command::GetActSceneNameWithIndexs,
        Command::GetInactSceneNameWithIndexs,
        Command::GetNumOfRules,
        Command::GetRuleWithIndexs,
        Command::GetZoneName,
        Command::Alive,
    ];

    /// Wire code
    #[inline]
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Look up a wire code
    pub fn from_code(code: u16) -> Result<Self, FrameError> {
        Self::ALL
            .iter()
            .copied()
            .find(|cmd| cmd.code() == code)
            .ok_or(FrameError::UnknownCommand(code))
    }

    /// True for `GET_*` requests
    pub const fn is_get(self) -> bool {
        self.code() & 0xFF00 == GET_FLAG
    }

    /// Fixed payload length for this command
    pub const fn payload_len(self) -> usize {
        match self {
            Command::SetDevVal => 6,
            Command::SetNumOfDevs => 4,
            Command::SetDevWithIndexs => 10,
            Command::SetNumOfScenes => 2,
            Command::SetActSceneNameWithIndexs => 9,
            Command::SetInactSceneNameWithIndexs => 9,
            Command::SetNumOfRules => 10,
            Command::SetRuleWithIndexs => 27,
            Command::SetZoneName => 17,
            Command::SetNewScene => 8,
            Command::SetRemoveScene => 8,
            Command::SetRenameInactScene => 16,
            Command::GetDevVal => 4,
            Command::GetNumOfDevs => 0,
            Command::GetDevWithIndexs => 4,
            Command::GetNumOfScenes => 0,
            Command::GetActSceneNameWithIndexs => 1,
            Command::GetInactSceneNameWithIndexs => 1,
            Command::GetNumOfRules => 8,
            Command::GetRuleWithIndexs => 10,
            Command::GetZoneName => 1,
            Command::Alive => 4,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:04x})", self, self.code())
    }
}

/// Undecoded GFF frame: command plus raw payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GffFrame {
    command: Command,
    payload: Vec<u8>,
}

impl GffFrame {
    /// Create a frame, rejecting payloads longer than the length byte allows
    pub fn new(command: Command, payload: Vec<u8>) -> Result<Self, FrameError> {
        if payload.len() > GFF_MAX_DATA_SIZE {
            return Err(FrameError::PayloadTooLarge {
                size: payload.len(),
                max: GFF_MAX_DATA_SIZE,
            });
        }
        Ok(Self { command, payload })
    }

    /// Frame for a payload laid out by [`Command::payload_len`]
    pub(crate) fn with_fixed_payload(command: Command, payload: Vec<u8>) -> Self {
        debug_assert_eq!(payload.len(), command.payload_len());
        Self { command, payload }
    }

    /// Command code
    pub fn command(&self) -> Command {
        self.command
    }

    /// Raw payload
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Encoded size in bytes
    pub fn size(&self) -> usize {
        GFF_HEADER_SIZE + self.payload.len()
    }

    /// Serialize the frame to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.size()];
        buf[GFF_LEN_POS] = self.payload.len() as u8;
        bytes_from_u16(self.command.code(), &mut buf[GFF_CMD_POS..]);
        buf[GFF_DATA_POS..].copy_from_slice(&self.payload);
        buf
    }

    /// Parse a frame from the start of `data`
    ///
    /// Bytes past the declared payload are ignored.
    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < GFF_HEADER_SIZE {
            return Err(FrameError::TooShort {
                size: data.len(),
                min: GFF_HEADER_SIZE,
            });
        }

        let len = data[GFF_LEN_POS] as usize;
        let available = data.len() - GFF_HEADER_SIZE;
        if len > available {
            return Err(FrameError::Truncated {
                declared: len,
                available,
            });
        }

        let command = Command::from_code(u16_from_bytes(&data[GFF_CMD_POS..]))?;
        Ok(Self {
            command,
            payload: data[GFF_DATA_POS..GFF_DATA_POS + len].to_vec(),
        })
    }

    /// Check the payload length against the command layout
    pub fn expect_payload_len(&self) -> Result<&[u8], FrameError> {
        let expected = self.command.payload_len();
        if self.payload.len() != expected {
            return Err(FrameError::PayloadLength {
                command: self.command,
                expected,
                actual: self.payload.len(),
            });
        }
        Ok(&self.payload)
    }
}

/// Split a datagram into the frames it carries
///
/// The frames must cover `data` exactly, each with the payload length of
/// its command. An empty datagram is rejected as too short.
pub fn split_frames(data: &[u8]) -> Result<Vec<GffFrame>, FrameError> {
    if data.is_empty() {
        return Err(FrameError::TooShort {
            size: 0,
            min: GFF_HEADER_SIZE,
        });
    }
    let mut frames = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let frame = GffFrame::from_bytes(&data[offset..])?;
        frame.expect_payload_len()?;
        offset += frame.size();
        frames.push(frame);
    }
    Ok(frames)
}

impl fmt::Display for GffFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.command)?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::SetRenameInactScene.code(), 0x000B);
        assert_eq!(Command::GetZoneName.code(), Command::SetZoneName.code() | GET_FLAG);
        assert_eq!(Command::GetRuleWithIndexs.code(), 0x0107);
        assert_eq!(Command::Alive.code(), 0x0200);
        assert!(Command::GetDevVal.is_get());
        assert!(!Command::SetDevVal.is_get());
        assert!(!Command::Alive.is_get());
    }

    #[test]
    fn test_from_code() {
        for cmd in Command::ALL {
            assert_eq!(Command::from_code(cmd.code()).unwrap(), cmd);
        }
        assert_eq!(
            Command::from_code(0x0109),
            Err(FrameError::UnknownCommand(0x0109))
        );
    }

    #[test]
    fn test_frame_layout() {
        let frame = GffFrame::new(Command::GetDevVal, vec![1, 2, 3, 4]).unwrap();
        assert_eq!(frame.to_bytes(), vec![4, 0x01, 0x00, 1, 2, 3, 4]);
        assert_eq!(frame.size(), 7);
    }

    #[test]
    fn test_parse_frame() {
        let frame = GffFrame::from_bytes(&[1, 0x02, 0x00, 0xEE, 0xFF]).unwrap();
        assert_eq!(frame.command(), Command::Alive);
        assert_eq!(frame.payload(), &[0xEE]);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            GffFrame::from_bytes(&[0, 0]),
            Err(FrameError::TooShort { size: 2, min: 3 })
        ));
        assert!(matches!(
            GffFrame::from_bytes(&[5, 0x00, 0x00, 1]),
            Err(FrameError::Truncated {
                declared: 5,
                available: 1
            })
        ));
        assert!(matches!(
            GffFrame::from_bytes(&[0, 0x03, 0x00]),
            Err(FrameError::UnknownCommand(0x0300))
        ));
    }

    #[test]
    fn test_payload_too_large() {
        let result = GffFrame::new(Command::SetZoneName, vec![0; 256]);
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { size: 256, max: 255 })
        ));
    }

    #[test]
    fn test_expect_payload_len() {
        let frame = GffFrame::new(Command::SetDevVal, vec![0; 5]).unwrap();
        assert!(matches!(
            frame.expect_payload_len(),
            Err(FrameError::PayloadLength {
                expected: 6,
                actual: 5,
                ..
            })
        ));
    }

    #[test]
    fn test_split_frames() {
        let alive = [4, 0x02, 0x00, 1, 1, 0, 2];
        let mut two = alive.to_vec();
        two.extend_from_slice(&[4, 0x01, 0x00, 9, 9, 9, 9]);
        let frames = split_frames(&two).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].command(), Command::Alive);
        assert_eq!(frames[1].command(), Command::GetDevVal);

        // A truncated frame swallows the head of the next one and leaves a
        // stub behind
        let mut glued = vec![6, 0x00, 0x00, 1, 2];
        glued.extend_from_slice(&alive);
        assert!(matches!(
            split_frames(&glued),
            Err(FrameError::Truncated { .. })
        ));
        assert!(matches!(
            split_frames(&[5, 0x00, 0x00, 1, 2, 3, 4, 5]),
            Err(FrameError::PayloadLength { .. })
        ));
        assert!(matches!(
            split_frames(&[6, 0x00, 0x00, 1, 2]),
            Err(FrameError::Truncated { .. })
        ));
        // Trailing bytes after a whole frame
        let mut trailing = alive.to_vec();
        trailing.push(0);
        assert!(matches!(
            split_frames(&trailing),
            Err(FrameError::TooShort { size: 1, .. })
        ));
        assert!(split_frames(&[]).is_err());
    }

    #[test]
    fn test_display() {
        let frame = GffFrame::new(Command::GetZoneName, vec![0xFF]).unwrap();
        assert_eq!(frame.to_string(), "GetZoneName(0x0108) [ff]");
    }
}
