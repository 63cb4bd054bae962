//! State-synchronization engine between a home-automation hub and the
//! entities that mirror its devices.
//!
//! - **[`SyncDispatcher`]** — Composition root. [`start()`](SyncDispatcher::start)
//!   restores persisted values, then runs one reactor task per enabled
//!   interface: heartbeat probes, the event subscription, bulk fetches and
//!   reconnection. Writes go through per-device queues so writes to one
//!   device never overlap.
//!
//! - **[`ValueStateTracker`]** — Per-parameter trust classification
//!   (`NOT_VALID`, `RESTORED`, `VALID`, `UNCERTAIN`) that decides what a
//!   caller-facing [`read()`](SyncDispatcher::read) returns.
//!
//! - **[`ConnectionHealthMonitor`]** — Heartbeat state machine per
//!   interface. Detects silent links and a second consumer sharing our
//!   identity on the hub, reported on the [`DiagnosticStream`].
//!
//! - **Schedules** ([`schedule`]) — Conversion and validation between the
//!   device's fixed-capacity weekday slots and the user-facing period form.

mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod health;
pub mod model;
pub mod persist;
pub mod schedule;
pub mod stream;
pub mod values;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{HealthConfig, InterfaceConfig, ReconnectConfig, SyncConfig};
pub use dispatcher::SyncDispatcher;
pub use error::CoreError;
pub use health::{
    ConflictKind, ConflictSignal, ConnectionHealthMonitor, HealthSignal, HealthSnapshot,
    HubHealth, InterfaceState, InterfaceStatus,
};
pub use model::{DeviceInfo, ParameterKey, ParameterKind};
pub use persist::{MemoryValueStore, StoreError, ValueStore};
pub use stream::{Diagnostic, DiagnosticStream};
pub use values::{
    ParameterUpdate, Reading, UpdateSource, ValueObserver, ValueRecord, ValueState,
    ValueStateTracker,
};

pub use schedule::{
    ScheduleError, ScheduleLimits, ScheduleProfile, ScheduleSlot, SimplePeriod, SimpleWeekday,
    Weekday, WeekdayError, WeekdaySchedule,
};

// Transport vocabulary, so consumers need only this crate.
pub use hubsync_api::{DeviceAddress, InterfaceId, ParamValue, Paramset, Transport, TransportEvent};
