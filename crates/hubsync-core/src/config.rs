// ── Runtime synchronization configuration ──
//
// These types describe how the dispatcher talks to a hub and how
// aggressively it watches each interface. They never touch disk: the
// CLI (or any embedding application) builds a `SyncConfig` and hands it in.

use std::time::Duration;

use hubsync_api::InterfaceId;
use url::Url;

/// One logical channel to the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceConfig {
    pub id: InterfaceId,
    /// Disabled interfaces are known but never probed or read.
    pub enabled: bool,
}

impl InterfaceConfig {
    pub fn new(id: impl Into<InterfaceId>) -> Self {
        Self {
            id: id.into(),
            enabled: true,
        }
    }
}

/// Heartbeat tuning for the connection health monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    /// Interval between liveness probes. Default: 15s.
    pub probe_interval: Duration,
    /// Silence (no ack, no data event) before a healthy interface is
    /// considered degraded. Default: 10min.
    pub degrade_after: Duration,
    /// Consecutive probe cycles a probe/ack mismatch must hold before a
    /// conflict signal is raised. Default: 3.
    pub conflict_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            degrade_after: Duration::from_secs(600),
            conflict_threshold: 3,
        }
    }
}

/// Exponential backoff configuration for interface reconnection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt. Default: 1s.
    pub initial_delay: Duration,
    /// Upper bound on backoff delay. Default: 60s.
    pub max_delay: Duration,
    /// Maximum reconnection attempts before giving up.
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
    /// When `false`, a failed interface waits for a manual reconnect.
    pub enabled: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_retries: None,
            enabled: true,
        }
    }
}

/// Configuration for synchronizing with a single hub.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Hub endpoint, handed to the transport by the embedding application.
    pub hub_url: Url,
    pub interfaces: Vec<InterfaceConfig>,
    pub health: HealthConfig,
    pub reconnect: ReconnectConfig,
    /// Periodic bulk scan. `None` disables it; the initial fetch after
    /// start and reconnect always happens.
    pub refresh_interval: Option<Duration>,
    /// Minimum spacing between on-demand refreshes of one parameter.
    pub force_refresh_interval: Duration,
    /// Deadline for each device write round-trip.
    pub write_timeout: Duration,
    /// Queued writes per device before callers wait for room.
    pub write_queue_depth: usize,
}

impl SyncConfig {
    /// Defaults for everything except the hub and its interfaces.
    pub fn new(hub_url: Url, interfaces: Vec<InterfaceConfig>) -> Self {
        Self {
            hub_url,
            interfaces,
            health: HealthConfig::default(),
            reconnect: ReconnectConfig::default(),
            refresh_interval: None,
            force_refresh_interval: Duration::from_secs(60),
            write_timeout: Duration::from_secs(5),
            write_queue_depth: 32,
        }
    }

    pub fn interface(&self, id: &InterfaceId) -> Option<&InterfaceConfig> {
        self.interfaces.iter().find(|i| &i.id == id)
    }
}
