// ── Per-interface heartbeat state machine ──
//
// Owned by exactly one interface reactor, so nothing here is shared or
// locked. Time is always passed in; the monitor never reads a clock.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use hubsync_api::InterfaceId;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ConflictKind, ConflictSignal, HealthSignal, InterfaceState, InterfaceStatus};
use crate::config::HealthConfig;

/// An open mismatch window: the gap between probes and acks has been
/// moving one way.
#[derive(Debug, Clone, Copy)]
struct Mismatch {
    kind: ConflictKind,
    /// Probe cycles in this window in which the gap grew.
    growing: u32,
    /// Consecutive probe cycles in which it did not.
    steady: u32,
    raised: bool,
}

pub struct ConnectionHealthMonitor {
    interface_id: InterfaceId,
    config: HealthConfig,
    state: InterfaceState,
    /// Bumped on every reconnect; counters are per epoch.
    epoch: u64,
    next_seq: u64,
    probes_sent: u64,
    acks_received: u64,
    last_probe_sent_at: Option<DateTime<Utc>>,
    /// Last ack or data-plane event.
    last_activity: Instant,
    /// `probes_sent - acks_received` at the previous probe tick.
    last_gap: i64,
    mismatch: Option<Mismatch>,
}

impl ConnectionHealthMonitor {
    /// A freshly activated interface, waiting for its first ack.
    pub fn new(interface_id: InterfaceId, config: HealthConfig, now: Instant) -> Self {
        Self {
            interface_id,
            config,
            state: InterfaceState::Connecting,
            epoch: 0,
            next_seq: 1,
            probes_sent: 0,
            acks_received: 0,
            last_probe_sent_at: None,
            last_activity: now,
            last_gap: 0,
            mismatch: None,
        }
    }

    pub fn interface_id(&self) -> &InterfaceId {
        &self.interface_id
    }

    pub fn state(&self) -> InterfaceState {
        self.state
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn counters(&self) -> (u64, u64) {
        (self.probes_sent, self.acks_received)
    }

    pub fn status(&self) -> InterfaceStatus {
        InterfaceStatus {
            interface_id: self.interface_id.clone(),
            state: self.state,
            epoch: self.epoch,
            probes_sent: self.probes_sent,
            acks_received: self.acks_received,
            last_probe_sent_at: self.last_probe_sent_at,
        }
    }

    // ── Probe cycle ──────────────────────────────────────────────────

    /// Run the checks due at a probe tick: silence-based degradation and
    /// conflict detection over the cycle that just ended.
    pub fn evaluate(&mut self, now: Instant) -> Vec<HealthSignal> {
        let mut signals = Vec::new();

        if self.state == InterfaceState::Healthy
            && now.saturating_duration_since(self.last_activity) >= self.config.degrade_after
        {
            warn!(
                interface_id = %self.interface_id,
                silent_secs = now.saturating_duration_since(self.last_activity).as_secs(),
                "no acks or events, interface degraded"
            );
            signals.extend(self.transition(InterfaceState::Degraded));
        }

        if self.state != InterfaceState::Failed {
            signals.extend(self.check_conflict().map(HealthSignal::Conflict));
        }

        signals
    }

    /// Issue the next probe. `None` while the interface is failed.
    pub fn next_probe(&mut self) -> Option<u64> {
        if self.state == InterfaceState::Failed {
            return None;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.probes_sent += 1;
        self.last_probe_sent_at = Some(Utc::now());
        debug!(interface_id = %self.interface_id, seq, "probe sent");
        Some(seq)
    }

    /// The probe never left: it does not count as sent. Retried on the
    /// next tick.
    pub fn probe_failed(&mut self, seq: u64) {
        debug!(interface_id = %self.interface_id, seq, "probe send failed");
        self.probes_sent = self.probes_sent.saturating_sub(1);
    }

    // ── Inbound ──────────────────────────────────────────────────────

    pub fn record_ack(&mut self, seq: u64, now: Instant) -> Option<HealthSignal> {
        if self.state == InterfaceState::Failed {
            debug!(interface_id = %self.interface_id, seq, "ignoring ack on failed interface");
            return None;
        }
        self.acks_received += 1;
        self.last_activity = now;
        match self.state {
            InterfaceState::Connecting | InterfaceState::Degraded => {
                self.transition(InterfaceState::Healthy)
            }
            _ => None,
        }
    }

    /// Any data-plane event proves the link is alive.
    pub fn record_data_event(&mut self, now: Instant) -> Option<HealthSignal> {
        if self.state == InterfaceState::Failed {
            return None;
        }
        self.last_activity = now;
        if self.state == InterfaceState::Degraded {
            self.transition(InterfaceState::Healthy)
        } else {
            None
        }
    }

    /// Hard disconnect reported by the transport.
    pub fn record_disconnect(&mut self) -> Option<HealthSignal> {
        self.transition(InterfaceState::Failed)
    }

    /// The link is back: new epoch, counters restart.
    pub fn reconnected(&mut self, now: Instant) -> Option<HealthSignal> {
        if self.state != InterfaceState::Failed {
            return None;
        }
        self.epoch += 1;
        self.probes_sent = 0;
        self.acks_received = 0;
        self.last_gap = 0;
        self.mismatch = None;
        self.last_activity = now;
        info!(interface_id = %self.interface_id, epoch = self.epoch, "interface reconnected");
        self.transition(InterfaceState::Connecting)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn transition(&mut self, to: InterfaceState) -> Option<HealthSignal> {
        let from = self.state;
        if from == to {
            return None;
        }
        self.state = to;
        debug!(interface_id = %self.interface_id, %from, %to, "interface state changed");
        Some(HealthSignal::StateChanged { from, to })
    }

    fn gap(&self) -> i64 {
        let sent = i64::try_from(self.probes_sent).unwrap_or(i64::MAX);
        let acked = i64::try_from(self.acks_received).unwrap_or(i64::MAX);
        sent.saturating_sub(acked)
    }

    /// Judge the probe cycle that just ended by how the probe/ack gap
    /// moved during it. A window opens when the gap grows, is raised once
    /// the gap has grown in `conflict_threshold` of its cycles, and closes
    /// after `conflict_threshold` consecutive cycles without growth. A
    /// single lost or late ack therefore never raises.
    fn check_conflict(&mut self) -> Option<ConflictSignal> {
        let gap = self.gap();
        let change = gap.saturating_sub(self.last_gap);
        self.last_gap = gap;
        let grew = match change.cmp(&0) {
            Ordering::Greater => Some(ConflictKind::FewerAcksThanProbes),
            Ordering::Less => Some(ConflictKind::MoreAcksThanProbes),
            Ordering::Equal => None,
        };
        let threshold = self.config.conflict_threshold;

        let mut window = match (self.mismatch.take(), grew) {
            (Some(mut window), Some(kind)) if window.kind == kind => {
                window.growing = window.growing.saturating_add(1);
                window.steady = 0;
                window
            }
            (Some(mut window), _) => {
                window.steady = window.steady.saturating_add(1);
                if window.steady >= threshold {
                    if window.raised {
                        info!(
                            interface_id = %self.interface_id,
                            kind = %window.kind,
                            "probe/ack gap steady again"
                        );
                    }
                } else {
                    self.mismatch = Some(window);
                }
                return None;
            }
            (None, Some(kind)) => Mismatch {
                kind,
                growing: 1,
                steady: 0,
                raised: false,
            },
            (None, None) => return None,
        };

        let raise = !window.raised && window.growing >= threshold;
        window.raised |= raise;
        self.mismatch = Some(window);
        if !raise {
            return None;
        }

        warn!(
            interface_id = %self.interface_id,
            kind = %window.kind,
            probes_sent = self.probes_sent,
            acks_received = self.acks_received,
            "probe/ack mismatch, another instance may share this identity"
        );
        Some(ConflictSignal {
            interface_id: self.interface_id.clone(),
            kind: window.kind,
            probes_sent: self.probes_sent,
            acks_received: self.acks_received,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use super::*;
    use pretty_assertions::assert_eq;

    const TICK: Duration = Duration::from_secs(15);

    fn monitor(start: Instant) -> ConnectionHealthMonitor {
        ConnectionHealthMonitor::new(InterfaceId::new("HmIP-RF"), HealthConfig::default(), start)
    }

    fn conflicts(signals: &[HealthSignal]) -> Vec<ConflictSignal> {
        signals
            .iter()
            .filter_map(|s| match s {
                HealthSignal::Conflict(c) => Some(c.clone()),
                HealthSignal::StateChanged { .. } => None,
            })
            .collect()
    }

    /// Run `cycles` probe cycles, acknowledging probe `n` when `ack(n)`.
    fn run_cycles(
        m: &mut ConnectionHealthMonitor,
        start: Instant,
        cycles: u64,
        ack: impl Fn(u64) -> bool,
    ) -> Vec<ConflictSignal> {
        let mut raised = Vec::new();
        for n in 0..cycles {
            let now = start + TICK * u32::try_from(n).unwrap();
            raised.extend(conflicts(&m.evaluate(now)));
            let seq = m.next_probe().unwrap();
            if ack(n) {
                m.record_ack(seq, now);
            }
        }
        raised
    }

    #[test]
    fn first_ack_makes_interface_healthy() {
        let start = Instant::now();
        let mut m = monitor(start);
        assert_eq!(m.state(), InterfaceState::Connecting);

        let seq = m.next_probe().unwrap();
        assert_eq!(
            m.record_ack(seq, start),
            Some(HealthSignal::StateChanged {
                from: InterfaceState::Connecting,
                to: InterfaceState::Healthy
            })
        );
        assert_eq!(m.counters(), (1, 1));
    }

    #[test]
    fn silence_degrades_and_any_activity_recovers() {
        let start = Instant::now();
        let mut m = monitor(start);
        let seq = m.next_probe().unwrap();
        m.record_ack(seq, start);

        assert!(m.evaluate(start + Duration::from_secs(599)).is_empty());
        let signals = m.evaluate(start + Duration::from_secs(600));
        assert!(signals.contains(&HealthSignal::StateChanged {
            from: InterfaceState::Healthy,
            to: InterfaceState::Degraded
        }));

        let back = m.record_data_event(start + Duration::from_secs(601));
        assert_eq!(
            back,
            Some(HealthSignal::StateChanged {
                from: InterfaceState::Degraded,
                to: InterfaceState::Healthy
            })
        );
    }

    #[test]
    fn data_events_keep_a_healthy_interface_alive() {
        let start = Instant::now();
        let mut m = monitor(start);
        let seq = m.next_probe().unwrap();
        m.record_ack(seq, start);

        m.record_data_event(start + Duration::from_secs(500));
        let signals = m.evaluate(start + Duration::from_secs(700));
        assert!(
            !signals
                .iter()
                .any(|s| matches!(s, HealthSignal::StateChanged { .. })),
            "{signals:?}"
        );
        assert_eq!(m.state(), InterfaceState::Healthy);
    }

    #[test]
    fn sustained_ack_deficit_raises_once() {
        let start = Instant::now();
        let mut m = monitor(start);

        // 40 probes, the last 15 never acknowledged.
        let raised = run_cycles(&mut m, start, 40, |n| n < 25);

        assert_eq!(m.counters(), (40, 25));
        assert_eq!(raised.len(), 1, "{raised:?}");
        assert_eq!(raised[0].kind, ConflictKind::FewerAcksThanProbes);
    }

    #[test]
    fn intermittent_loss_still_raises_once_per_window() {
        let start = Instant::now();
        let mut m = monitor(start);
        // 3 of every 8 acks go missing, never more than two clean cycles apart.
        let raised = run_cycles(&mut m, start, 40, |n| !matches!(n % 8, 1 | 4 | 6));
        assert_eq!(m.counters(), (40, 25));
        assert_eq!(raised.len(), 1, "{raised:?}");
        assert_eq!(raised[0].kind, ConflictKind::FewerAcksThanProbes);
    }

    #[test]
    fn single_lost_ack_is_not_a_conflict() {
        let start = Instant::now();
        let mut m = monitor(start);
        let raised = run_cycles(&mut m, start, 20, |n| n != 2);
        assert_eq!(m.counters(), (20, 19));
        assert_eq!(raised, Vec::new());

        // The stale deficit does not mask a competitor that shows up later.
        let later = run_cycles(&mut m, start + TICK * 20, 10, |_| false);
        assert_eq!(later.len(), 1, "{later:?}");
        assert_eq!(later[0].kind, ConflictKind::FewerAcksThanProbes);
    }

    #[test]
    fn scattered_losses_are_not_a_conflict() {
        let start = Instant::now();
        let mut m = monitor(start);
        let raised = run_cycles(&mut m, start, 60, |n| n % 6 != 3);
        assert_eq!(m.counters(), (60, 50));
        assert_eq!(raised, Vec::new());
    }

    #[test]
    fn conflict_detected_while_still_connecting() {
        let start = Instant::now();
        let mut m = monitor(start);
        // Every ack is taken by another consumer from the start.
        let raised = run_cycles(&mut m, start, 40, |_| false);

        assert_eq!(m.state(), InterfaceState::Connecting);
        assert_eq!(m.counters(), (40, 0));
        assert_eq!(raised.len(), 1, "{raised:?}");
        assert_eq!(raised[0].kind, ConflictKind::FewerAcksThanProbes);
    }

    #[test]
    fn mismatch_shorter_than_threshold_is_ignored() {
        let start = Instant::now();
        let mut m = monitor(start);
        run_cycles(&mut m, start, 3, |_| true);

        // One lost ack that a relayed pong evens out two cycles later.
        let later = start + TICK * 3;
        assert!(conflicts(&m.evaluate(later)).is_empty());
        m.next_probe();
        assert!(conflicts(&m.evaluate(later + TICK)).is_empty());
        assert!(conflicts(&m.evaluate(later + TICK * 2)).is_empty());
        m.record_ack(0, later + TICK * 2);
        assert!(conflicts(&m.evaluate(later + TICK * 3)).is_empty());
    }

    #[test]
    fn steady_cycles_close_the_window_so_a_new_one_can_raise() {
        let start = Instant::now();
        let mut m = monitor(start);
        let first = run_cycles(&mut m, start, 6, |n| n < 2);
        assert_eq!(first.len(), 1);

        // Relayed pongs bring the counters level, then the link runs clean.
        let (sent, acked) = m.counters();
        let now = start + TICK * 6;
        for _ in acked..sent {
            m.record_ack(0, now);
        }
        assert_eq!(run_cycles(&mut m, now, 4, |_| true), Vec::new());

        let second = run_cycles(&mut m, now + TICK * 4, 6, |_| false);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn surplus_acks_raise_more_acks_than_probes() {
        let start = Instant::now();
        let mut m = monitor(start);
        let mut raised = Vec::new();
        for n in 0..5u32 {
            let now = start + TICK * n;
            raised.extend(conflicts(&m.evaluate(now)));
            let seq = m.next_probe().unwrap();
            m.record_ack(seq, now);
            // A second instance forwards its own pong to us every cycle.
            m.record_ack(seq + 1000, now);
        }
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, ConflictKind::MoreAcksThanProbes);
    }

    #[test]
    fn failed_probe_send_is_not_counted() {
        let start = Instant::now();
        let mut m = monitor(start);
        let seq = m.next_probe().unwrap();
        m.probe_failed(seq);
        assert_eq!(m.counters(), (0, 0));
        assert_eq!(m.next_probe(), Some(seq + 1));
    }

    #[test]
    fn disconnect_and_reconnect_start_a_new_epoch() {
        let start = Instant::now();
        let mut m = monitor(start);
        let seq = m.next_probe().unwrap();
        m.record_ack(seq, start);
        m.next_probe();

        assert_eq!(
            m.record_disconnect(),
            Some(HealthSignal::StateChanged {
                from: InterfaceState::Healthy,
                to: InterfaceState::Failed
            })
        );
        assert_eq!(m.next_probe(), None);
        assert_eq!(m.record_ack(99, start), None);

        assert_eq!(
            m.reconnected(start + TICK),
            Some(HealthSignal::StateChanged {
                from: InterfaceState::Failed,
                to: InterfaceState::Connecting
            })
        );
        assert_eq!(m.epoch(), 1);
        assert_eq!(m.counters(), (0, 0));
        assert_eq!(m.reconnected(start + TICK), None);
    }
}
