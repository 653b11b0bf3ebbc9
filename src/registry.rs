// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device registry
//!
//! This module provides the [`DeviceRegistry`], a fixed-capacity table of
//! the latest value reported by every live device. Records carry a TTL that
//! the owner decrements once per second; a record whose TTL reaches zero is
//! evicted.
//!
//! # File Format
//!
//! One record per line: `<device_id hex> <value> <ttl>`.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::codec::DeviceId;
use crate::error::{RegistryError, StorageError};

/// Default number of device slots
pub const DEFAULT_REGISTRY_CAPACITY: usize = 64;

/// Latest known state of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceRecord {
    pub device_id: DeviceId,
    pub value: i16,
    pub ttl: i16,
}

impl DeviceRecord {
    const EMPTY: DeviceRecord = DeviceRecord {
        device_id: DeviceId::NO_DEVICE,
        value: 0,
        ttl: 0,
    };

    /// True for an unused slot
    pub fn is_empty(&self) -> bool {
        self.device_id.is_none()
    }
}

/// Fixed-capacity device table
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    /// Slots; empty ones hold `DeviceId::NO_DEVICE`
    records: Vec<DeviceRecord>,
    /// Number of non-empty slots
    live: usize,
    /// Backing file for save/restore
    storage: Option<PathBuf>,
}

impl DeviceRegistry {
    /// Create an empty registry with `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            records: vec![DeviceRecord::EMPTY; capacity],
            live: 0,
            storage: None,
        }
    }

    /// Attach a backing file for [`save`](Self::save) and [`restore`](Self::restore)
    pub fn with_storage(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage = Some(path.into());
        self
    }

    /// Backing file, if any
    pub fn storage_path(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    /// Number of slots
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.live
    }

    /// True when no device is registered
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn position(&self, device_id: DeviceId) -> Option<usize> {
        if device_id.is_none() {
            return None;
        }
        self.records.iter().position(|r| r.device_id == device_id)
    }

    /// Store a value, creating the record on first sight
    ///
    /// A new record starts with TTL 0; callers refresh it with
    /// [`set_ttl`](Self::set_ttl).
    pub fn set_value(&mut self, device_id: DeviceId, value: i16) -> Result<(), RegistryError> {
        if device_id.is_none() {
            return Err(RegistryError::ReservedId);
        }
        if let Some(index) = self.position(device_id) {
            self.records[index].value = value;
            return Ok(());
        }

        let capacity = self.capacity();
        let slot = self
            .records
            .iter_mut()
            .find(|r| r.is_empty())
            .ok_or(RegistryError::Full { capacity })?;
        *slot = DeviceRecord {
            device_id,
            value,
            ttl: 0,
        };
        self.live += 1;
        debug!("registered device {} ({})", device_id, device_id.type_name());
        Ok(())
    }

    /// Stored value of a device
    pub fn get_value(&self, device_id: DeviceId) -> Option<i16> {
        self.get_record(device_id).map(|r| r.value)
    }

    /// Whole record of a device
    pub fn get_record(&self, device_id: DeviceId) -> Option<&DeviceRecord> {
        self.position(device_id).map(|i| &self.records[i])
    }

    /// Set a device's TTL; negative values clamp to 0
    pub fn set_ttl(&mut self, device_id: DeviceId, ttl: i16) -> Result<(), RegistryError> {
        let index = self
            .position(device_id)
            .ok_or(RegistryError::NotFound(device_id))?;
        self.records[index].ttl = ttl.max(0);
        Ok(())
    }

    /// TTL of a device
    pub fn get_ttl(&self, device_id: DeviceId) -> Option<i16> {
        self.get_record(device_id).map(|r| r.ttl)
    }

    /// Add `delta` to a device's TTL and return the new TTL
    ///
    /// Fails with [`RegistryError::TtlZero`] when the result is zero; the
    /// record stays in place.
    pub fn adjust_ttl(&mut self, device_id: DeviceId, delta: i16) -> Result<i16, RegistryError> {
        let index = self
            .position(device_id)
            .ok_or(RegistryError::NotFound(device_id))?;
        let record = &mut self.records[index];
        record.ttl = record.ttl.saturating_add(delta).max(0);
        if record.ttl == 0 {
            return Err(RegistryError::TtlZero(device_id));
        }
        Ok(record.ttl)
    }

    /// Decrement every live TTL, evicting records that reach zero
    ///
    /// Returns the evicted device ids.
    pub fn decrement_all_ttls(&mut self) -> Vec<DeviceId> {
        let mut evicted = Vec::new();
        for record in self.records.iter_mut().filter(|r| !r.is_empty()) {
            record.ttl = (record.ttl - 1).max(0);
            if record.ttl == 0 {
                evicted.push(record.device_id);
                *record = DeviceRecord::EMPTY;
            }
        }
        self.live -= evicted.len();
        for device_id in &evicted {
            info!("device {} expired", device_id);
        }
        evicted
    }

    /// Remove a device
    pub fn remove(&mut self, device_id: DeviceId) -> Result<DeviceRecord, RegistryError> {
        let index = self
            .position(device_id)
            .ok_or(RegistryError::NotFound(device_id))?;
        let record = std::mem::replace(&mut self.records[index], DeviceRecord::EMPTY);
        self.live -= 1;
        Ok(record)
    }

    /// Move live records to the front so they occupy slots `0..len()`
    ///
    /// Relative order of live records is not preserved.
    pub fn compact(&mut self) {
        loop {
            let first_empty = self.records.iter().position(|r| r.is_empty());
            let last_live = self.records.iter().rposition(|r| !r.is_empty());
            match (first_empty, last_live) {
                (Some(empty), Some(live)) if empty < live => {
                    self.records.swap(empty, live);
                }
                _ => break,
            }
        }
    }

    /// Record in slot `index`, `None` for empty or out-of-range slots
    pub fn get_by_index(&self, index: usize) -> Option<&DeviceRecord> {
        self.records.get(index).filter(|r| !r.is_empty())
    }

    /// Live records in slot order
    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter().filter(|r| !r.is_empty())
    }

    /// Drop every record
    pub fn clear(&mut self) {
        self.records.fill(DeviceRecord::EMPTY);
        self.live = 0;
    }

    /// Write every live record to the backing file
    pub fn save(&self) -> Result<(), StorageError> {
        match &self.storage {
            Some(path) => self.save_to(path),
            None => Ok(()),
        }
    }

    /// Write every live record to `path`, replacing its content
    pub fn save_to(&self, path: &Path) -> Result<(), StorageError> {
        let mut content = String::new();
        for record in self.iter() {
            content.push_str(&format!(
                "{:x} {} {}\n",
                record.device_id.raw(),
                record.value,
                record.ttl
            ));
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        fs::write(path, content).map_err(|e| StorageError::io(path, e))
    }

    /// Reload records from the backing file
    pub fn restore(&mut self) -> Result<usize, StorageError> {
        match self.storage.clone() {
            Some(path) => self.restore_from(&path),
            None => Ok(0),
        }
    }

    /// Replace the content with the records stored in `path`
    ///
    /// On any error the registry is left empty. Returns the number of
    /// restored records.
    pub fn restore_from(&mut self, path: &Path) -> Result<usize, StorageError> {
        self.clear();
        let result = fs::read_to_string(path)
            .map_err(|e| StorageError::io(path, e))
            .and_then(|content| self.load_lines(&content, path));
        if let Err(ref e) = result {
            if !e.is_not_found() {
                warn!("device list restore failed: {}", e);
            }
            self.clear();
        }
        result
    }

    fn load_lines(&mut self, content: &str, path: &Path) -> Result<usize, StorageError> {
        for (i, line) in content.lines().enumerate() {
            let line_no = i + 1;
            if line.trim().is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(id), Some(value), Some(ttl), None) =
                (parts.next(), parts.next(), parts.next(), parts.next())
            else {
                return Err(StorageError::parse(path, line_no, "expected 3 fields"));
            };
            let device_id = u32::from_str_radix(id, 16)
                .map(DeviceId)
                .map_err(|_| StorageError::parse(path, line_no, format!("bad device id {:?}", id)))?;
            let value: i16 = value
                .parse()
                .map_err(|_| StorageError::parse(path, line_no, format!("bad value {:?}", value)))?;
            let ttl: i16 = ttl
                .parse()
                .map_err(|_| StorageError::parse(path, line_no, format!("bad ttl {:?}", ttl)))?;

            self.set_value(device_id, value)
                .and_then(|_| self.set_ttl(device_id, ttl))
                .map_err(|e| StorageError::parse(path, line_no, e.to_string()))?;
        }
        Ok(self.live)
    }

    /// Render the diagnostic device table
    pub fn list(&self) -> String {
        self.to_string()
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl fmt::Display for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>3} | {:8} | {:>6} | i/o | {:>4} | name", "#", "id", "value", "ttl")?;
        for (i, record) in self.iter().enumerate() {
            writeln!(
                f,
                "{:>3} | {} | {:>6} | {:3} | {:>4} | {}",
                i,
                record.device_id,
                record.value,
                record.device_id.io_class().to_string(),
                record.ttl,
                record.device_id.type_name()
            )?;
        }
        Ok(())
    }
}
