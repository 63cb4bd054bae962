use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry as MapEntry;
use hubsync_api::{InterfaceId, ParamValue};
use tokio::time::Instant;
use tracing::debug;

use super::{ParameterUpdate, Reading, UpdateSource, ValueRecord, ValueState};
use crate::model::{ParameterKey, ParameterKind};

struct Entry {
    kind: ParameterKind,
    record: ValueRecord,
}

impl Entry {
    fn new(kind: ParameterKind) -> Self {
        Self {
            kind,
            record: ValueRecord::unknown(),
        }
    }
}

/// Per-parameter trust state machine.
///
/// Transitions never move a value backwards: once `VALID` or `UNCERTAIN`,
/// a parameter can only become `VALID` (fresh data) or `UNCERTAIN` (hub
/// restart) again.
pub struct ValueStateTracker {
    entries: DashMap<ParameterKey, Entry>,
    /// Last on-demand refresh per parameter.
    refreshed: DashMap<ParameterKey, Instant>,
    refresh_interval: Duration,
}

impl ValueStateTracker {
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            refreshed: DashMap::new(),
            refresh_interval,
        }
    }

    /// Register a parameter, or update the kind of a known one.
    /// Returns `true` if the parameter was new.
    pub fn register(&self, key: ParameterKey, kind: ParameterKind) -> bool {
        match self.entries.entry(key) {
            MapEntry::Occupied(mut occupied) => {
                occupied.get_mut().kind = kind;
                false
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(Entry::new(kind));
                true
            }
        }
    }

    pub fn kind(&self, key: &ParameterKey) -> Option<ParameterKind> {
        self.entries.get(key).map(|e| e.kind.clone())
    }

    pub fn keys(&self) -> Vec<ParameterKey> {
        self.entries.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// `NOT_VALID → RESTORED` with a persisted value. Ignored for unknown
    /// parameters and for any parameter that already holds a value.
    pub fn restore(
        &self,
        key: &ParameterKey,
        value: ParamValue,
        at: DateTime<Utc>,
    ) -> Option<ParameterUpdate> {
        let mut entry = self.entries.get_mut(key)?;
        if entry.record.state != ValueState::NotValid {
            debug!(key = %key, state = %entry.record.state, "skipping restore of known value");
            return None;
        }
        entry.record = ValueRecord {
            value: Some(value.clone()),
            state: ValueState::Restored,
            last_update_source: Some(UpdateSource::Persisted),
            updated_at: Some(at),
        };
        Some(ParameterUpdate {
            key: key.clone(),
            value: Some(value),
            state: ValueState::Restored,
            source: UpdateSource::Persisted,
        })
    }

    /// `* → VALID` from a fetch or an event. Unknown parameters are
    /// registered with a kind inferred from the value.
    pub fn apply(
        &self,
        key: &ParameterKey,
        value: ParamValue,
        source: UpdateSource,
        at: DateTime<Utc>,
    ) -> ParameterUpdate {
        let mut entry = self.entries.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "auto-registering parameter");
            Entry::new(ParameterKind::infer(&value))
        });
        entry.record = ValueRecord {
            value: Some(value.clone()),
            state: ValueState::Valid,
            last_update_source: Some(source),
            updated_at: Some(at),
        };
        ParameterUpdate {
            key: key.clone(),
            value: Some(value),
            state: ValueState::Valid,
            source,
        }
    }

    /// `VALID → UNCERTAIN` for every parameter of an interface whose hub
    /// restarted. Restored and unknown values are left alone.
    pub fn mark_uncertain(&self, interface_id: &InterfaceId) -> Vec<ParameterUpdate> {
        self.entries
            .iter_mut()
            .filter(|e| &e.key().interface_id == interface_id)
            .filter_map(|mut e| {
                if e.record.state != ValueState::Valid {
                    return None;
                }
                e.record.state = ValueState::Uncertain;
                let source = e.record.last_update_source.unwrap_or(UpdateSource::Event);
                Some(ParameterUpdate {
                    key: e.key().clone(),
                    value: e.record.value.clone(),
                    state: ValueState::Uncertain,
                    source,
                })
            })
            .collect()
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn read(&self, key: &ParameterKey) -> Reading {
        self.entries
            .get(key)
            .map_or_else(Reading::unknown, |e| Reading::from(&e.record))
    }

    pub fn record(&self, key: &ParameterKey) -> Option<ValueRecord> {
        self.entries.get(key).map(|e| e.record.clone())
    }

    /// Claim the on-demand refresh slot of a parameter. Fails with the
    /// remaining wait if the last refresh was too recent.
    pub fn begin_refresh(&self, key: &ParameterKey, now: Instant) -> Result<(), Duration> {
        match self.refreshed.entry(key.clone()) {
            MapEntry::Occupied(mut occupied) => {
                let elapsed = now.saturating_duration_since(*occupied.get());
                if elapsed < self.refresh_interval {
                    return Err(self.refresh_interval - elapsed);
                }
                occupied.insert(now);
            }
            MapEntry::Vacant(vacant) => {
                vacant.insert(now);
            }
        }
        Ok(())
    }
}
