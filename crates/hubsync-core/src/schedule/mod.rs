// ── Weekly heating schedules ──
//
// Pure, stateless conversion between the compact "simple" representation
// (base temperature + periods) and the device's fixed-capacity slot list,
// plus the wire and paramset shapes both travel in.

mod codec;
mod wire;

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};
use thiserror::Error;

pub use codec::{canonical_to_simple, compact_slots, normalize_weekday, simple_to_canonical};
pub use wire::{
    SimpleWeekdayData, WeekdayData, WirePeriod, WireSlot, profile_from_paramset, simple_from_wire,
    simple_to_wire, slots_from_wire, slots_to_wire, weekday_from_paramset, weekday_to_paramset,
};

/// Minutes in a day; the end of the last slot.
pub const MINUTES_PER_DAY: u16 = 1440;

/// Slot capacity most thermostats declare.
pub const DEFAULT_SLOT_CAPACITY: usize = 13;

/// Slot indices travel as a `u8` on the wire.
pub const MAX_SLOT_CAPACITY: usize = 255;

pub const DEFAULT_MIN_TEMP: f64 = 4.5;
pub const DEFAULT_MAX_TEMP: f64 = 30.5;

// ── Calendar ─────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

/// Named week program stored on the device.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
#[strum(ascii_case_insensitive)]
pub enum ScheduleProfile {
    P1,
    P2,
    P3,
    P4,
    P5,
    P6,
}

// ── Slots and periods ────────────────────────────────────────────────

/// One entry of the device's fixed-capacity representation: the
/// temperature that holds until `end_minute`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub end_minute: u16,
    pub temperature: f64,
}

impl ScheduleSlot {
    pub fn new(end_minute: u16, temperature: f64) -> Self {
        Self {
            end_minute,
            temperature,
        }
    }
}

/// Half-open interval `[start_minute, end_minute)` at a fixed temperature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimplePeriod {
    pub start_minute: u16,
    pub end_minute: u16,
    pub temperature: f64,
}

/// Human-friendly weekday: gaps between periods take `base_temperature`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleWeekday {
    pub base_temperature: f64,
    pub periods: Vec<SimplePeriod>,
}

/// Either representation a caller may submit for a weekday.
#[derive(Debug, Clone, PartialEq)]
pub enum WeekdaySchedule {
    Canonical(Vec<ScheduleSlot>),
    Simple(SimpleWeekday),
}

impl WeekdaySchedule {
    /// Validate and expand to the device's canonical slot list.
    pub fn to_canonical(&self, limits: &ScheduleLimits) -> Result<Vec<ScheduleSlot>, ScheduleError> {
        match self {
            Self::Canonical(slots) => normalize_weekday(slots, limits),
            Self::Simple(simple) => simple_to_canonical(simple, limits),
        }
    }
}

/// Device-declared bounds for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleLimits {
    pub capacity: usize,
    pub min_temp: f64,
    pub max_temp: f64,
}

impl ScheduleLimits {
    pub fn new(capacity: usize, min_temp: f64, max_temp: f64) -> Self {
        Self {
            capacity,
            min_temp,
            max_temp,
        }
    }

    /// Reject capacities no weekday can be encoded with.
    pub fn check(&self) -> Result<(), ScheduleError> {
        if (1..=MAX_SLOT_CAPACITY).contains(&self.capacity) {
            Ok(())
        } else {
            Err(ScheduleError::InvalidCapacity {
                capacity: self.capacity,
                max: MAX_SLOT_CAPACITY,
            })
        }
    }

    pub(crate) fn contains(&self, temperature: f64) -> bool {
        temperature.is_finite() && (self.min_temp..=self.max_temp).contains(&temperature)
    }
}

impl Default for ScheduleLimits {
    fn default() -> Self {
        Self::new(DEFAULT_SLOT_CAPACITY, DEFAULT_MIN_TEMP, DEFAULT_MAX_TEMP)
    }
}

// ── Errors ───────────────────────────────────────────────────────────

/// Where in the submitted schedule a temperature was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    /// 1-based slot index.
    Slot(usize),
    /// 1-based period index of a simple schedule.
    Period(usize),
    Base,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Slot(n) => write!(f, "slot {n}"),
            Self::Period(n) => write!(f, "period {n}"),
            Self::Base => f.write_str("base temperature"),
        }
    }
}

/// Schedule validation failure. Never reaches the transport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScheduleError {
    #[error("schedule has no slots")]
    EmptySchedule,

    #[error("slot {slot}: invalid time '{value}' (expected HH:MM between 00:00 and 24:00)")]
    InvalidTime { slot: usize, value: String },

    #[error("slot {slot}: end time {end_time} is earlier than the previous slot's {previous}")]
    OutOfOrderSlot {
        slot: usize,
        end_time: String,
        previous: String,
    },

    #[error("{position}: temperature {temperature} outside {min}..={max}")]
    TemperatureOutOfRange {
        position: Position,
        temperature: f64,
        min: f64,
        max: f64,
    },

    #[error("schedule needs {required} slots but the device holds {capacity}")]
    CapacityExceeded { required: usize, capacity: usize },

    #[error("slot capacity {capacity} is outside 1..={max}")]
    InvalidCapacity { capacity: usize, max: usize },

    #[error("period {period}: {reason}")]
    InvalidPeriod { period: usize, reason: String },

    #[error("slot {slot}: missing {field} in device paramset")]
    MissingSlotValue { slot: usize, field: &'static str },
}

/// A [`ScheduleError`] raised while handling several weekdays at once.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{weekday}: {source}")]
pub struct WeekdayError {
    pub weekday: Weekday,
    #[source]
    pub source: ScheduleError,
}

// ── Time helpers ─────────────────────────────────────────────────────

/// Parse `HH:MM` into minutes since midnight. `24:00` is the end of day.
pub fn parse_time(value: &str) -> Option<u16> {
    let (hours, minutes) = value.trim().split_once(':')?;
    if hours.is_empty() || minutes.len() != 2 {
        return None;
    }
    let hours: u16 = hours.parse().ok()?;
    let minutes: u16 = minutes.parse().ok()?;
    if minutes >= 60 || hours > 24 || (hours == 24 && minutes != 0) {
        return None;
    }
    Some(hours * 60 + minutes)
}

/// Format minutes since midnight as `HH:MM`.
pub fn format_time(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

pub(crate) fn same_temperature(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
