// HA Controller - Scene rule engine and GFF dispatcher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Packed wall-clock time
//!
//! Time-range conditions compare timestamps in the FAT directory-entry
//! layout, which orders correctly as a plain `u32`:
//!
//! ```text
//! [year-1980: 7] [month: 4] [day: 5] [hour: 5] [minute: 6] [second/2: 5]
//! ```
//!
//! The low 16 bits hold the time of day and are used for daily ranges.

use std::fmt;

use chrono::{Datelike, Local, NaiveDateTime, Timelike};

/// Mask selecting the time-of-day half of a packed timestamp
pub const TIME_OF_DAY_MASK: u32 = 0x0000_FFFF;

/// First year representable in the packed layout
pub const EPOCH_YEAR: i32 = 1980;

/// Timestamp packed in the FAT layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PackedTime(pub u32);

impl PackedTime {
    /// Pack calendar fields; years before 1980 clamp to 1980
    pub fn from_fields(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        let year = (year - EPOCH_YEAR).clamp(0, 0x7F) as u32;
        Self(
            (year << 25)
                | ((month as u32 & 0x0F) << 21)
                | ((day as u32 & 0x1F) << 16)
                | ((hour as u32 & 0x1F) << 11)
                | ((minute as u32 & 0x3F) << 5)
                | ((second as u32 / 2) & 0x1F),
        )
    }

    /// Time-of-day only, for daily comparisons
    pub fn daily(hour: u8, minute: u8, second: u8) -> Self {
        Self(Self::from_fields(EPOCH_YEAR, 0, 0, hour, minute, second).0 & TIME_OF_DAY_MASK)
    }

    /// Raw packed value
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Low 16 bits (hour, minute, second)
    #[inline]
    pub const fn time_of_day(self) -> u32 {
        self.0 & TIME_OF_DAY_MASK
    }

    /// Calendar year
    pub fn year(self) -> i32 {
        EPOCH_YEAR + (self.0 >> 25) as i32
    }

    /// Month (1-12)
    pub fn month(self) -> u8 {
        ((self.0 >> 21) & 0x0F) as u8
    }

    /// Day of month (1-31)
    pub fn day(self) -> u8 {
        ((self.0 >> 16) & 0x1F) as u8
    }

    /// Hour (0-23)
    pub fn hour(self) -> u8 {
        ((self.0 >> 11) & 0x1F) as u8
    }

    /// Minute (0-59)
    pub fn minute(self) -> u8 {
        ((self.0 >> 5) & 0x3F) as u8
    }

    /// Second, rounded down to even
    pub fn second(self) -> u8 {
        ((self.0 & 0x1F) * 2) as u8
    }
}

impl From<NaiveDateTime> for PackedTime {
    fn from(dt: NaiveDateTime) -> Self {
        Self::from_fields(
            dt.year(),
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
        )
    }
}

impl fmt::Display for PackedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year(),
            self.month(),
            self.day(),
            self.hour(),
            self.minute(),
            self.second()
        )
    }
}

/// Source of the current time
pub trait Clock: Send {
    /// Current local time, packed
    fn now(&self) -> PackedTime;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PackedTime {
        PackedTime::from(Local::now().naive_local())
    }
}

/// Clock frozen at a settable instant
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock {
    now: PackedTime,
}

impl FixedClock {
    /// Create a clock stopped at `now`
    pub fn new(now: PackedTime) -> Self {
        Self { now }
    }

    /// Move the clock
    pub fn set(&mut self, now: PackedTime) {
        self.now = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> PackedTime {
        self.now
    }
}
