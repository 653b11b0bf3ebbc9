//! Error types for the HA controller
//!
//! Each component has its own error enum; [`HaError`] wraps them for callers
//! that cross component boundaries.

use std::path::PathBuf;

use thiserror::Error;

use crate::codec::DeviceId;
use crate::frame::Command;

/// Main error type for controller operations
#[derive(Error, Debug)]
pub enum HaError {
    /// Frame queue error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// GFF frame error
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Device registry error
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Scene or rule error
    #[error("Scene error: {0}")]
    Scene(#[from] SceneError),

    /// Persistent storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Controller task no longer running
    #[error("Controller task stopped")]
    Stopped,
}

/// Frame queue errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// Not enough free space for the push
    #[error("Queue overflow: {needed} bytes needed, {available} free")]
    Overflow { needed: usize, available: usize },

    /// Fewer bytes stored than requested
    #[error("Queue underflow: {requested} bytes requested, {occupied} stored")]
    Underflow { requested: usize, occupied: usize },

    /// Pop target buffer cannot hold the next frame
    #[error("Output buffer too small: {size} bytes (need {needed})")]
    BufferTooSmall { size: usize, needed: usize },
}

/// GFF frame errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than a frame header
    #[error("Frame too short: {size} bytes (min: {min})")]
    TooShort { size: usize, min: usize },

    /// Buffer ends before the declared payload
    #[error("Truncated frame: declared {declared} payload bytes, {available} present")]
    Truncated { declared: usize, available: usize },

    /// Payload does not fit the length byte
    #[error("Payload too large: {size} bytes (max: {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Command code not in the catalogue
    #[error("Unknown command: 0x{0:04x}")]
    UnknownCommand(u16),

    /// Payload length does not match the command layout
    #[error("Bad payload length for {command:?}: {actual} bytes (expected {expected})")]
    PayloadLength {
        command: Command,
        expected: usize,
        actual: usize,
    },

    /// Payload field could not be decoded
    #[error("Malformed {command:?} payload: {reason}")]
    Malformed { command: Command, reason: String },
}

/// Device registry errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryError {
    /// No free record for a new device
    #[error("Registry full ({capacity} records)")]
    Full { capacity: usize },

    /// Device not present
    #[error("Device not found: {0}")]
    NotFound(DeviceId),

    /// TTL reached zero after an adjustment
    #[error("TTL reached zero for device {0}")]
    TtlZero(DeviceId),

    /// The empty-slot id cannot be stored
    #[error("Device id 00000000 is reserved")]
    ReservedId,
}

/// Scene and rule errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SceneError {
    /// Rule index beyond scene capacity
    #[error("Rule index {index} out of range (max: {max})")]
    IndexOutOfRange { index: usize, max: usize },

    /// Slot holds no valid rule
    #[error("No valid rule at index {0}")]
    EmptySlot(usize),

    /// Condition code not recognised
    #[error("Unknown condition code: {0}")]
    UnknownCondition(u8),

    /// Action code not recognised
    #[error("Unknown action code: {0}")]
    UnknownAction(u8),

    /// Rule already carries the maximum number of inputs
    #[error("Too many rule inputs (max: {max})")]
    TooManyInputs { max: usize },

    /// Rule already carries the maximum number of outputs
    #[error("Too many rule outputs (max: {max})")]
    TooManyOutputs { max: usize },

    /// Name unusable as a scene name
    #[error("Invalid scene name: {0:?}")]
    InvalidName(String),

    /// Scene file does not exist
    #[error("Scene not found: {0}")]
    NotFound(String),

    /// Scene is active or default and cannot be touched
    #[error("Scene {0} is protected")]
    Protected(String),

    /// Destination name already taken
    #[error("Scene already exists: {0}")]
    AlreadyExists(String),

    /// A provisioning session is running
    #[error("Scene provisioning in progress")]
    ProvisioningInProgress,

    /// Persisting or loading the scene failed
    #[error("{0}")]
    Storage(#[from] StorageError),
}

/// Persistent storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File content could not be parsed
    #[error("Parse error in {} line {line}: {reason}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl StorageError {
    /// Wrap an I/O error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Build a parse error
    pub fn parse(path: impl Into<PathBuf>, line: usize, reason: impl Into<String>) -> Self {
        StorageError::Parse {
            path: path.into(),
            line,
            reason: reason.into(),
        }
    }

    /// True when the underlying file does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

// `io::Error` has no `PartialEq`; compare I/O errors by kind.
impl PartialEq for StorageError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (StorageError::Io { path: a, source: sa }, StorageError::Io { path: b, source: sb }) => {
                a == b && sa.kind() == sb.kind()
            }
            (
                StorageError::Parse {
                    path: a,
                    line: la,
                    reason: ra,
                },
                StorageError::Parse {
                    path: b,
                    line: lb,
                    reason: rb,
                },
            ) => a == b && la == lb && ra == rb,
            _ => false,
        }
    }
}

impl Eq for StorageError {}

impl Clone for StorageError {
    fn clone(&self) -> Self {
        match self {
            StorageError::Io { path, source } => StorageError::Io {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            StorageError::Parse { path, line, reason } => StorageError::Parse {
                path: path.clone(),
                line: *line,
                reason: reason.clone(),
            },
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, HaError>;
