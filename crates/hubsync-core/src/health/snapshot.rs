// ── Hub-wide health aggregation ──
//
// Published as a whole after every interface transition; readers never
// see a half-updated view.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use hubsync_api::InterfaceId;
use serde::{Deserialize, Serialize};
use strum::Display;

use super::InterfaceState;

/// Point-in-time status of one monitored interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceStatus {
    pub interface_id: InterfaceId,
    pub state: InterfaceState,
    pub epoch: u64,
    pub probes_sent: u64,
    pub acks_received: u64,
    pub last_probe_sent_at: Option<DateTime<Utc>>,
}

impl InterfaceStatus {
    /// An interface that has not answered anything yet.
    pub fn connecting(interface_id: InterfaceId) -> Self {
        Self {
            interface_id,
            state: InterfaceState::Connecting,
            epoch: 0,
            probes_sent: 0,
            acks_received: 0,
            last_probe_sent_at: None,
        }
    }
}

/// Overall health across every enabled interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HubHealth {
    /// Interfaces are still connecting and none is in trouble.
    Starting,
    /// Every interface is healthy.
    Running,
    /// At least one interface is degraded or failed.
    Degraded,
    /// Every interface failed.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub hub: HubHealth,
    pub interfaces: BTreeMap<InterfaceId, InterfaceStatus>,
}

impl HealthSnapshot {
    pub fn new(statuses: impl IntoIterator<Item = InterfaceStatus>) -> Self {
        let interfaces: BTreeMap<_, _> = statuses
            .into_iter()
            .map(|s| (s.interface_id.clone(), s))
            .collect();
        let hub = aggregate(interfaces.values().map(|s| s.state));
        Self { hub, interfaces }
    }

    /// A copy with one interface's status replaced.
    pub fn with_status(&self, status: InterfaceStatus) -> Self {
        let mut interfaces = self.interfaces.clone();
        interfaces.insert(status.interface_id.clone(), status);
        let hub = aggregate(interfaces.values().map(|s| s.state));
        Self { hub, interfaces }
    }

    pub fn state_of(&self, interface_id: &InterfaceId) -> Option<InterfaceState> {
        self.interfaces.get(interface_id).map(|s| s.state)
    }
}

fn aggregate(states: impl Iterator<Item = InterfaceState>) -> HubHealth {
    let (mut total, mut healthy, mut failed, mut troubled) = (0usize, 0usize, 0usize, 0usize);
    for state in states {
        total += 1;
        match state {
            InterfaceState::Healthy => healthy += 1,
            InterfaceState::Failed => {
                failed += 1;
                troubled += 1;
            }
            InterfaceState::Degraded => troubled += 1,
            InterfaceState::Connecting => {}
        }
    }

    if total == 0 {
        HubHealth::Starting
    } else if failed == total {
        HubHealth::Failed
    } else if healthy == total {
        HubHealth::Running
    } else if troubled > 0 {
        HubHealth::Degraded
    } else {
        HubHealth::Starting
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: &str, state: InterfaceState) -> InterfaceStatus {
        InterfaceStatus {
            state,
            ..InterfaceStatus::connecting(InterfaceId::new(id))
        }
    }

    #[test]
    fn aggregates_interface_states() {
        use InterfaceState::{Connecting, Degraded, Failed, Healthy};

        let cases = [
            (vec![Connecting, Connecting], HubHealth::Starting),
            (vec![Healthy, Connecting], HubHealth::Starting),
            (vec![Healthy, Healthy], HubHealth::Running),
            (vec![Healthy, Degraded], HubHealth::Degraded),
            (vec![Connecting, Failed], HubHealth::Degraded),
            (vec![Failed, Failed], HubHealth::Failed),
        ];
        for (states, expected) in cases {
            let snapshot = HealthSnapshot::new(
                states
                    .iter()
                    .enumerate()
                    .map(|(i, s)| status(&format!("if{i}"), *s)),
            );
            assert_eq!(snapshot.hub, expected, "states {states:?}");
        }
    }

    #[test]
    fn with_status_replaces_one_interface() {
        let snapshot = HealthSnapshot::new([
            status("HmIP-RF", InterfaceState::Healthy),
            status("BidCos-RF", InterfaceState::Connecting),
        ]);
        let next = snapshot.with_status(status("BidCos-RF", InterfaceState::Healthy));

        assert_eq!(snapshot.hub, HubHealth::Starting);
        assert_eq!(next.hub, HubHealth::Running);
        assert_eq!(
            next.state_of(&InterfaceId::new("BidCos-RF")),
            Some(InterfaceState::Healthy)
        );
    }
}
