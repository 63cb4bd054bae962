// ── Wire and paramset shapes ──
//
// Public action surface: a weekday is a map of slot index (1..capacity) to
// `{end_time: "HH:MM", temperature}`; a simple weekday is
// `{base_temperature, periods: [{start_time, end_time, temperature}]}`.
// On the device each slot is two master-paramset fields:
// `{P}_ENDTIME_{WEEKDAY}_{n}` (minutes) and `{P}_TEMPERATURE_{WEEKDAY}_{n}`.

use std::collections::BTreeMap;

use hubsync_api::{ParamValue, Paramset};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::{
    ScheduleError, ScheduleProfile, ScheduleSlot, SimplePeriod, SimpleWeekday, Weekday,
    WeekdayError, format_time, parse_time,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireSlot {
    pub end_time: String,
    pub temperature: f64,
}

/// Slot index (1-based) → slot. Callers may submit fewer than `capacity`
/// entries; the codec fills the rest.
pub type WeekdayData = BTreeMap<u8, WireSlot>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePeriod {
    pub start_time: String,
    pub end_time: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleWeekdayData {
    pub base_temperature: f64,
    #[serde(default)]
    pub periods: Vec<WirePeriod>,
}

// ── Wire <-> model ───────────────────────────────────────────────────

/// Parse wire slots in slot-index order.
pub fn slots_from_wire(data: &WeekdayData) -> Result<Vec<ScheduleSlot>, ScheduleError> {
    data.iter()
        .map(|(&index, slot)| {
            let end_minute = parse_time(&slot.end_time).ok_or_else(|| ScheduleError::InvalidTime {
                slot: usize::from(index),
                value: slot.end_time.clone(),
            })?;
            Ok(ScheduleSlot::new(end_minute, slot.temperature))
        })
        .collect()
}

pub fn slots_to_wire(slots: &[ScheduleSlot]) -> WeekdayData {
    (1..=u8::MAX)
        .zip(slots)
        .map(|(index, slot)| {
            let wire = WireSlot {
                end_time: format_time(slot.end_minute),
                temperature: slot.temperature,
            };
            (index, wire)
        })
        .collect()
}

pub fn simple_from_wire(data: &SimpleWeekdayData) -> Result<SimpleWeekday, ScheduleError> {
    let periods = data
        .periods
        .iter()
        .enumerate()
        .map(|(idx, period)| {
            let parse = |value: &str| {
                parse_time(value).ok_or_else(|| ScheduleError::InvalidPeriod {
                    period: idx + 1,
                    reason: format!("invalid time '{value}'"),
                })
            };
            Ok(SimplePeriod {
                start_minute: parse(&period.start_time)?,
                end_minute: parse(&period.end_time)?,
                temperature: period.temperature,
            })
        })
        .collect::<Result<Vec<_>, ScheduleError>>()?;

    Ok(SimpleWeekday {
        base_temperature: data.base_temperature,
        periods,
    })
}

pub fn simple_to_wire(simple: &SimpleWeekday) -> SimpleWeekdayData {
    SimpleWeekdayData {
        base_temperature: simple.base_temperature,
        periods: simple
            .periods
            .iter()
            .map(|p| WirePeriod {
                start_time: format_time(p.start_minute),
                end_time: format_time(p.end_minute),
                temperature: p.temperature,
            })
            .collect(),
    }
}

// ── Model <-> device paramset ────────────────────────────────────────

fn endtime_key(profile: ScheduleProfile, weekday: Weekday, slot: usize) -> String {
    format!("{profile}_ENDTIME_{weekday}_{slot}")
}

fn temperature_key(profile: ScheduleProfile, weekday: Weekday, slot: usize) -> String {
    format!("{profile}_TEMPERATURE_{weekday}_{slot}")
}

/// Encode one weekday as the paramset fields written in a single round-trip.
pub fn weekday_to_paramset(
    profile: ScheduleProfile,
    weekday: Weekday,
    slots: &[ScheduleSlot],
) -> Paramset {
    let mut paramset = Paramset::new();
    for (idx, slot) in slots.iter().enumerate() {
        let n = idx + 1;
        paramset.insert(
            endtime_key(profile, weekday, n),
            ParamValue::Integer(i64::from(slot.end_minute)),
        );
        paramset.insert(
            temperature_key(profile, weekday, n),
            ParamValue::Float(slot.temperature),
        );
    }
    paramset
}

/// Decode one weekday from a master paramset. Reads slots 1.. until the
/// first missing end time.
pub fn weekday_from_paramset(
    profile: ScheduleProfile,
    weekday: Weekday,
    paramset: &Paramset,
) -> Result<Vec<ScheduleSlot>, ScheduleError> {
    let mut slots = Vec::new();
    for n in 1.. {
        let Some(end) = paramset.get(&endtime_key(profile, weekday, n)) else {
            break;
        };
        let end_minute = end
            .as_i64()
            .and_then(|m| u16::try_from(m).ok())
            .ok_or_else(|| ScheduleError::InvalidTime {
                slot: n,
                value: end.to_string(),
            })?;
        let temperature = paramset
            .get(&temperature_key(profile, weekday, n))
            .and_then(ParamValue::as_f64)
            .ok_or(ScheduleError::MissingSlotValue {
                slot: n,
                field: "temperature",
            })?;
        slots.push(ScheduleSlot::new(end_minute, temperature));
    }

    if slots.is_empty() {
        return Err(ScheduleError::EmptySchedule);
    }
    Ok(slots)
}

/// Decode every weekday of a profile present in the paramset.
pub fn profile_from_paramset(
    profile: ScheduleProfile,
    paramset: &Paramset,
) -> Result<BTreeMap<Weekday, Vec<ScheduleSlot>>, WeekdayError> {
    let mut out = BTreeMap::new();
    for weekday in Weekday::iter() {
        match weekday_from_paramset(profile, weekday, paramset) {
            Ok(slots) => {
                out.insert(weekday, slots);
            }
            Err(ScheduleError::EmptySchedule) => {}
            Err(source) => return Err(WeekdayError { weekday, source }),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::schedule::{ScheduleLimits, normalize_weekday};
    use pretty_assertions::assert_eq;

    fn wire(end_time: &str, temperature: f64) -> WireSlot {
        WireSlot {
            end_time: end_time.into(),
            temperature,
        }
    }

    #[test]
    fn partial_wire_weekday_is_filled_to_capacity() {
        let data: WeekdayData = serde_json::from_value(serde_json::json!({
            "1": { "end_time": "06:00", "temperature": 18.0 },
            "2": { "end_time": "22:00", "temperature": 21.0 }
        }))
        .unwrap();

        let slots = slots_from_wire(&data).unwrap();
        let canonical = normalize_weekday(&slots, &ScheduleLimits::new(5, 4.5, 30.5)).unwrap();
        let out = slots_to_wire(&canonical);

        assert_eq!(out.len(), 5);
        assert_eq!(out[&1], wire("06:00", 18.0));
        assert_eq!(out[&2], wire("22:00", 21.0));
        for idx in 3..=5 {
            assert_eq!(out[&idx], wire("24:00", 21.0));
        }
    }

    #[test]
    fn wire_slots_follow_slot_index_not_insertion() {
        let mut data = WeekdayData::new();
        data.insert(2, wire("24:00", 20.0));
        data.insert(1, wire("07:00", 17.0));
        let slots = slots_from_wire(&data).unwrap();
        assert_eq!(slots[0].end_minute, 420);
        assert_eq!(slots[1].end_minute, 1440);
    }

    #[test]
    fn bad_wire_time_names_the_slot() {
        let mut data = WeekdayData::new();
        data.insert(1, wire("06:00", 18.0));
        data.insert(2, wire("25:00", 18.0));
        assert_eq!(
            slots_from_wire(&data),
            Err(ScheduleError::InvalidTime {
                slot: 2,
                value: "25:00".into()
            })
        );
    }

    #[test]
    fn simple_wire_shape() {
        let data: SimpleWeekdayData = serde_json::from_str(
            r#"{"base_temperature": 17.0, "periods": [{"start_time": "06:00", "end_time": "08:00", "temperature": 21.0}]}"#,
        )
        .unwrap();
        let simple = simple_from_wire(&data).unwrap();
        assert_eq!(simple.periods[0].start_minute, 360);
        assert_eq!(simple_to_wire(&simple), data);
    }

    #[test]
    fn paramset_keys_follow_device_naming() {
        let slots = [ScheduleSlot::new(360, 17.0), ScheduleSlot::new(1440, 21.0)];
        let paramset = weekday_to_paramset(ScheduleProfile::P2, Weekday::Tuesday, &slots);

        assert_eq!(paramset.len(), 4);
        assert_eq!(paramset["P2_ENDTIME_TUESDAY_1"], ParamValue::Integer(360));
        assert_eq!(paramset["P2_TEMPERATURE_TUESDAY_2"], ParamValue::Float(21.0));
        assert_eq!(
            weekday_from_paramset(ScheduleProfile::P2, Weekday::Tuesday, &paramset).unwrap(),
            slots
        );
    }

    #[test]
    fn missing_temperature_is_reported() {
        let mut paramset = Paramset::new();
        paramset.insert("P1_ENDTIME_MONDAY_1".into(), ParamValue::Integer(1440));
        assert_eq!(
            weekday_from_paramset(ScheduleProfile::P1, Weekday::Monday, &paramset),
            Err(ScheduleError::MissingSlotValue {
                slot: 1,
                field: "temperature"
            })
        );
    }

    #[test]
    fn profile_decode_skips_absent_weekdays() {
        let slots = [ScheduleSlot::new(1440, 19.0)];
        let mut paramset = weekday_to_paramset(ScheduleProfile::P1, Weekday::Monday, &slots);
        paramset.extend(weekday_to_paramset(ScheduleProfile::P1, Weekday::Sunday, &slots));
        paramset.extend(weekday_to_paramset(ScheduleProfile::P2, Weekday::Friday, &slots));

        let profile = profile_from_paramset(ScheduleProfile::P1, &paramset).unwrap();
        assert_eq!(
            profile.keys().copied().collect::<Vec<_>>(),
            vec![Weekday::Monday, Weekday::Sunday]
        );
    }

    #[test]
    fn profile_decode_names_broken_weekday() {
        let mut paramset = Paramset::new();
        paramset.insert("P1_ENDTIME_THURSDAY_1".into(), ParamValue::Integer(1440));
        let err = profile_from_paramset(ScheduleProfile::P1, &paramset).unwrap_err();
        assert_eq!(err.weekday, Weekday::Thursday);
        assert_eq!(err.to_string(), "THURSDAY: slot 1: missing temperature in device paramset");
    }
}
