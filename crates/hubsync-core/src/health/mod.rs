// ── Connection health ──
//
// Heartbeat bookkeeping per hub interface, plus the immutable snapshot
// aggregated across interfaces. The monitor is a plain state machine:
// the interface reactor feeds it time and events and acts on what it
// returns.

mod backoff;
mod monitor;
mod snapshot;

use hubsync_api::InterfaceId;
use serde::{Deserialize, Serialize};
use strum::Display;

pub use backoff::calculate_backoff;
pub use monitor::ConnectionHealthMonitor;
pub use snapshot::{HealthSnapshot, HubHealth, InterfaceStatus};

/// Lifecycle of one interface.
///
/// `CONNECTING → HEALTHY ⇄ DEGRADED → FAILED`, and `FAILED → CONNECTING`
/// after a successful reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum InterfaceState {
    Connecting,
    Healthy,
    Degraded,
    Failed,
}

/// Which way the probe and ack counters disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum ConflictKind {
    /// Another consumer with our identity is likely taking our acks.
    FewerAcksThanProbes,
    /// Another consumer with our identity is likely forwarding its acks to us.
    MoreAcksThanProbes,
}

/// Non-fatal diagnostic: raised once per sustained mismatch window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictSignal {
    pub interface_id: InterfaceId,
    pub kind: ConflictKind,
    pub probes_sent: u64,
    pub acks_received: u64,
}

/// Something the monitor wants surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSignal {
    StateChanged {
        from: InterfaceState,
        to: InterfaceState,
    },
    Conflict(ConflictSignal),
}
