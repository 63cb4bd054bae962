// ── Value trust tracking ──
//
// Every addressable parameter carries a trust classification next to its
// cached value. The tracker is the only writer; everyone else reads
// snapshots.

mod tracker;

use chrono::{DateTime, Utc};
use hubsync_api::ParamValue;
use serde::{Deserialize, Serialize};
use strum::Display;

use crate::model::ParameterKey;

pub use tracker::ValueStateTracker;

/// How far the cached value of a parameter can be trusted.
///
/// ```text
/// NOT_VALID ──restore──▶ RESTORED ──fetch/event──▶ VALID ◀──fetch/event── UNCERTAIN
///     └──────────────fetch/event─────────────────────▲  └──hub restart──────▶┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueState {
    /// No value has ever been known.
    NotValid,
    /// Loaded from persistence at startup, not yet confirmed by the hub.
    Restored,
    /// Confirmed by an initial fetch or a live event.
    Valid,
    /// The hub restarted since the value was last confirmed.
    Uncertain,
}

/// Where the current value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateSource {
    Event,
    InitialFetch,
    Persisted,
}

/// Cached value and trust state of one parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRecord {
    pub value: Option<ParamValue>,
    pub state: ValueState,
    pub last_update_source: Option<UpdateSource>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ValueRecord {
    pub(crate) fn unknown() -> Self {
        Self {
            value: None,
            state: ValueState::NotValid,
            last_update_source: None,
            updated_at: None,
        }
    }
}

/// What a caller-facing read returns.
///
/// `value` is `None` exactly when `state` is [`ValueState::NotValid`]:
/// an unknown value is never papered over with a stale one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: Option<ParamValue>,
    pub state: ValueState,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Reading {
    pub(crate) fn unknown() -> Self {
        Self {
            value: None,
            state: ValueState::NotValid,
            updated_at: None,
        }
    }

    /// Only `VALID` values are confirmed fresh.
    pub fn is_fresh(&self) -> bool {
        self.state == ValueState::Valid
    }
}

impl From<&ValueRecord> for Reading {
    fn from(record: &ValueRecord) -> Self {
        if record.state == ValueState::NotValid {
            return Self::unknown();
        }
        Self {
            value: record.value.clone(),
            state: record.state,
            updated_at: record.updated_at,
        }
    }
}

/// A state transition handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub key: ParameterKey,
    pub value: Option<ParamValue>,
    pub state: ValueState,
    pub source: UpdateSource,
}

/// Entity-layer callback.
///
/// Invoked synchronously on the dispatch path; implementations must not
/// block and should hand follow-up work to their own tasks.
pub trait ValueObserver: Send + Sync {
    fn on_update(&self, update: &ParameterUpdate);
}

impl<F> ValueObserver for F
where
    F: Fn(&ParameterUpdate) + Send + Sync,
{
    fn on_update(&self, update: &ParameterUpdate) {
        self(update);
    }
}
