// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Zone names, one file per zone id
//!
//! Files are named by the zone id in lowercase hex. Nothing is cached.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::StorageError;

/// Zone name field size on the wire
pub const ZONE_NAME_SIZE: usize = 16;

/// Zone id used by `GET_ZONE_NAME` to request every zone
pub const ALL_ZONES: u8 = 0xFF;

/// Zone name store
#[derive(Debug, Clone)]
pub struct ZoneRegistry {
    folder: PathBuf,
}

impl ZoneRegistry {
    /// Store zone names under `folder`
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    fn zone_file(&self, zone_id: u8) -> PathBuf {
        self.folder.join(format!("{:x}", zone_id))
    }

    /// Store a zone name, truncated to [`ZONE_NAME_SIZE`] bytes
    pub fn set_name(&self, zone_id: u8, name: &str) -> Result<(), StorageError> {
        fs::create_dir_all(&self.folder).map_err(|e| StorageError::io(&self.folder, e))?;
        let path = self.zone_file(zone_id);
        fs::write(&path, truncate_name(name)).map_err(|e| StorageError::io(&path, e))?;
        debug!("zone {:x} named {:?}", zone_id, name);
        Ok(())
    }

    /// Name of a zone, `None` when never set
    pub fn get_name(&self, zone_id: u8) -> Result<Option<String>, StorageError> {
        let path = self.zone_file(zone_id);
        match fs::read_to_string(&path) {
            Ok(name) => Ok(Some(name.lines().next().unwrap_or("").to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }

    /// Every stored zone, sorted by id
    ///
    /// Files whose name is not a hex zone id are skipped.
    pub fn list(&self) -> Result<Vec<(u8, String)>, StorageError> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.folder, e)),
        };

        let mut zones = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StorageError::io(&self.folder, e))?;
            let Some(zone_id) = entry
                .file_name()
                .to_str()
                .and_then(|name| u8::from_str_radix(name, 16).ok())
            else {
                continue;
            };
            if let Some(name) = self.get_name(zone_id)? {
                zones.push((zone_id, name));
            }
        }
        zones.sort();
        Ok(zones)
    }
}

/// Cut `name` to at most [`ZONE_NAME_SIZE`] bytes on a char boundary
pub fn truncate_name(name: &str) -> &str {
    if name.len() <= ZONE_NAME_SIZE {
        return name;
    }
    let mut end = ZONE_NAME_SIZE;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}
