// ── Schedule codec ──
//
// Canonical form: exactly `capacity` slots, end minutes non-decreasing,
// last slot ends at 24:00. Slots past the last real transition repeat it
// at 24:00 ("padding").

use std::collections::BTreeSet;

use super::{
    MINUTES_PER_DAY, Position, ScheduleError, ScheduleLimits, ScheduleSlot, SimplePeriod,
    SimpleWeekday, format_time, same_temperature,
};

/// Validate a partial slot list and expand it to the canonical form.
///
/// Slots are taken in their declared order (slot index). The output is
/// idempotent: normalizing a canonical list returns it unchanged.
pub fn normalize_weekday(
    slots: &[ScheduleSlot],
    limits: &ScheduleLimits,
) -> Result<Vec<ScheduleSlot>, ScheduleError> {
    limits.check()?;
    let Some(last) = slots.last() else {
        return Err(ScheduleError::EmptySchedule);
    };
    if slots.len() > limits.capacity {
        return Err(ScheduleError::CapacityExceeded {
            required: slots.len(),
            capacity: limits.capacity,
        });
    }

    for (idx, slot) in slots.iter().enumerate() {
        if slot.end_minute > MINUTES_PER_DAY {
            return Err(ScheduleError::InvalidTime {
                slot: idx + 1,
                value: format_time(slot.end_minute),
            });
        }
    }

    for (idx, pair) in slots.windows(2).enumerate() {
        if let [previous, current] = pair {
            if current.end_minute < previous.end_minute {
                return Err(ScheduleError::OutOfOrderSlot {
                    slot: idx + 2,
                    end_time: format_time(current.end_minute),
                    previous: format_time(previous.end_minute),
                });
            }
        }
    }

    for (idx, slot) in slots.iter().enumerate() {
        if !limits.contains(slot.temperature) {
            return Err(ScheduleError::TemperatureOutOfRange {
                position: Position::Slot(idx + 1),
                temperature: slot.temperature,
                min: limits.min_temp,
                max: limits.max_temp,
            });
        }
    }

    // A day that ends early needs one more slot to reach 24:00.
    if last.end_minute < MINUTES_PER_DAY && slots.len() == limits.capacity {
        return Err(ScheduleError::CapacityExceeded {
            required: slots.len() + 1,
            capacity: limits.capacity,
        });
    }

    let padding = ScheduleSlot::new(MINUTES_PER_DAY, last.temperature);
    let mut canonical = Vec::with_capacity(limits.capacity);
    canonical.extend_from_slice(slots);
    canonical.resize(limits.capacity, padding);
    Ok(canonical)
}

/// Expand a simple weekday into canonical slots.
///
/// Overlapping periods are resolved last-declared-wins: a later period
/// overrides earlier ones on the sub-range they share.
pub fn simple_to_canonical(
    simple: &SimpleWeekday,
    limits: &ScheduleLimits,
) -> Result<Vec<ScheduleSlot>, ScheduleError> {
    limits.check()?;
    if !limits.contains(simple.base_temperature) {
        return Err(ScheduleError::TemperatureOutOfRange {
            position: Position::Base,
            temperature: simple.base_temperature,
            min: limits.min_temp,
            max: limits.max_temp,
        });
    }
    for (idx, period) in simple.periods.iter().enumerate() {
        validate_period(idx + 1, period, limits)?;
    }

    let mut boundaries = BTreeSet::from([0, MINUTES_PER_DAY]);
    for period in &simple.periods {
        boundaries.insert(period.start_minute);
        boundaries.insert(period.end_minute);
    }
    let boundaries: Vec<u16> = boundaries.into_iter().collect();

    let mut runs: Vec<ScheduleSlot> = Vec::new();
    for window in boundaries.windows(2) {
        let &[start, end] = window else { continue };
        let temperature = simple
            .periods
            .iter()
            .rev()
            .find(|p| p.start_minute <= start && end <= p.end_minute)
            .map_or(simple.base_temperature, |p| p.temperature);

        match runs.last_mut() {
            Some(run) if same_temperature(run.temperature, temperature) => run.end_minute = end,
            _ => runs.push(ScheduleSlot::new(end, temperature)),
        }
    }

    if runs.len() > limits.capacity {
        return Err(ScheduleError::CapacityExceeded {
            required: runs.len(),
            capacity: limits.capacity,
        });
    }

    normalize_weekday(&runs, limits)
}

/// Collapse a canonical weekday into base temperature + periods.
///
/// The base temperature is the one covering the most minutes (ties go to
/// the lower temperature); every other run becomes a period.
pub fn canonical_to_simple(slots: &[ScheduleSlot]) -> Result<SimpleWeekday, ScheduleError> {
    let compact = compact_slots(slots);
    if compact.is_empty() {
        return Err(ScheduleError::EmptySchedule);
    }

    let mut runs: Vec<SimplePeriod> = Vec::new();
    let mut start = 0;
    for slot in compact {
        if slot.end_minute > start {
            match runs.last_mut() {
                Some(run) if same_temperature(run.temperature, slot.temperature) => {
                    run.end_minute = slot.end_minute;
                }
                _ => runs.push(SimplePeriod {
                    start_minute: start,
                    end_minute: slot.end_minute,
                    temperature: slot.temperature,
                }),
            }
            start = slot.end_minute;
        }
    }

    let base_temperature = dominant_temperature(&runs).unwrap_or(compact[0].temperature);
    let periods = runs
        .into_iter()
        .filter(|run| !same_temperature(run.temperature, base_temperature))
        .collect();

    Ok(SimpleWeekday {
        base_temperature,
        periods,
    })
}

/// Drop the padding: everything after the first slot that ends at 24:00.
pub fn compact_slots(slots: &[ScheduleSlot]) -> &[ScheduleSlot] {
    match slots.iter().position(|s| s.end_minute >= MINUTES_PER_DAY) {
        Some(idx) => &slots[..=idx],
        None => slots,
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

fn validate_period(
    index: usize,
    period: &SimplePeriod,
    limits: &ScheduleLimits,
) -> Result<(), ScheduleError> {
    if period.end_minute > MINUTES_PER_DAY {
        return Err(ScheduleError::InvalidPeriod {
            period: index,
            reason: format!("end time {} is past 24:00", format_time(period.end_minute)),
        });
    }
    if period.start_minute >= period.end_minute {
        return Err(ScheduleError::InvalidPeriod {
            period: index,
            reason: format!(
                "start {} is not before end {}",
                format_time(period.start_minute),
                format_time(period.end_minute)
            ),
        });
    }
    if !limits.contains(period.temperature) {
        return Err(ScheduleError::TemperatureOutOfRange {
            position: Position::Period(index),
            temperature: period.temperature,
            min: limits.min_temp,
            max: limits.max_temp,
        });
    }
    Ok(())
}

fn dominant_temperature(runs: &[SimplePeriod]) -> Option<f64> {
    let mut totals: Vec<(f64, u32)> = Vec::new();
    for run in runs {
        let minutes = u32::from(run.end_minute - run.start_minute);
        match totals
            .iter_mut()
            .find(|(t, _)| same_temperature(*t, run.temperature))
        {
            Some((_, total)) => *total += minutes,
            None => totals.push((run.temperature, minutes)),
        }
    }
    totals
        .into_iter()
        .max_by(|(ta, ma), (tb, mb)| ma.cmp(mb).then_with(|| tb.total_cmp(ta)))
        .map(|(t, _)| t)
}
