// ── Interface reactor ──
//
// One task per enabled interface. Every timer, event and transport
// completion for the interface is handled here, one at a time, so the
// health monitor needs no locking.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::stream::{FuturesUnordered, StreamExt};
use hubsync_api::{Ack, BulkValues, EventStream, InterfaceId, TransportEvent};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SyncDispatcher;
use crate::config::ReconnectConfig;
use crate::error::CoreError;
use crate::health::{ConnectionHealthMonitor, HealthSignal, InterfaceState, calculate_backoff};
use crate::model::ParameterKey;
use crate::stream::Diagnostic;
use crate::values::UpdateSource;

/// Requests from the dispatcher to a running reactor.
pub(super) enum ReactorControl {
    Reconnect {
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
}

/// A transport call the reactor started and is waiting on.
enum Completion {
    Probe {
        epoch: u64,
        seq: u64,
        result: Result<Ack, hubsync_api::Error>,
    },
    Fetch {
        epoch: u64,
        result: Result<BulkValues, hubsync_api::Error>,
    },
    Reconnect {
        result: Result<(), hubsync_api::Error>,
    },
}

pub(super) async fn interface_reactor(
    dispatcher: SyncDispatcher,
    interface_id: InterfaceId,
    mut control_rx: mpsc::Receiver<ReactorControl>,
    cancel: CancellationToken,
) {
    let config = dispatcher.config();
    let probe_interval = config.health.probe_interval;
    let refresh_interval = config.refresh_interval;
    let reconnect = config.reconnect.clone();
    let monitor = ConnectionHealthMonitor::new(
        interface_id.clone(),
        config.health.clone(),
        Instant::now(),
    );
    let mut reactor = Reactor {
        reconnect,
        probe_timeout: probe_interval,
        dispatcher,
        interface_id,
        monitor,
        events: None,
        pending: FuturesUnordered::new(),
        fetching: None,
        reconnect_at: None,
        reconnect_attempt: 0,
        reconnect_in_flight: false,
        reconnect_waiters: Vec::new(),
    };

    info!(interface_id = %reactor.interface_id, "interface reactor started");
    if reactor.open_events() {
        reactor.start_fetch();
    }

    // First tick fires immediately: the opening probe.
    let mut probe_timer = tokio::time::interval(probe_interval);
    probe_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut refresh_timer = refresh_interval.map(|period| {
        let mut timer = tokio::time::interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        timer
    });

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            Some(control) = control_rx.recv() => reactor.on_control(control),

            event = next_event(&mut reactor.events) => match event {
                Some(event) => reactor.on_event(event),
                None => {
                    reactor.events = None;
                    reactor.on_link_lost(Some("event stream closed"));
                }
            },

            Some(done) = reactor.pending.next(), if !reactor.pending.is_empty() => {
                reactor.on_completion(done);
            }

            () = sleep_until_opt(reactor.reconnect_at) => {
                reactor.reconnect_at = None;
                reactor.begin_reconnect();
            }

            _ = probe_timer.tick() => reactor.on_probe_tick(),

            () = tick_opt(&mut refresh_timer) => reactor.on_refresh_tick(),
        }
    }

    reactor.reply_waiters(|| Err(CoreError::ShuttingDown));
    info!(interface_id = %reactor.interface_id, "interface reactor stopped");
}

struct Reactor {
    dispatcher: SyncDispatcher,
    interface_id: InterfaceId,
    monitor: ConnectionHealthMonitor,
    reconnect: ReconnectConfig,
    probe_timeout: Duration,
    events: Option<EventStream>,
    pending: FuturesUnordered<BoxFuture<'static, Completion>>,
    /// Epoch of the bulk read in flight, if any.
    fetching: Option<u64>,
    reconnect_at: Option<Instant>,
    reconnect_attempt: u32,
    reconnect_in_flight: bool,
    reconnect_waiters: Vec<oneshot::Sender<Result<(), CoreError>>>,
}

impl Reactor {
    // ── Timers ───────────────────────────────────────────────────

    fn on_probe_tick(&mut self) {
        let signals = self.monitor.evaluate(Instant::now());
        let probe = self.monitor.next_probe();
        self.publish(signals);

        let Some(seq) = probe else { return };
        let transport = Arc::clone(&self.dispatcher.inner.transport);
        let interface_id = self.interface_id.clone();
        let epoch = self.monitor.epoch();
        let timeout = self.probe_timeout;
        self.pending.push(Box::pin(async move {
            let result = tokio::time::timeout(timeout, transport.send_probe(&interface_id, seq))
                .await
                .unwrap_or_else(|_| {
                    Err(hubsync_api::Error::Timeout {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    })
                });
            Completion::Probe { epoch, seq, result }
        }));
    }

    fn on_refresh_tick(&mut self) {
        if self.monitor.state() == InterfaceState::Failed {
            debug!(interface_id = %self.interface_id, "skipping refresh of failed interface");
            return;
        }
        self.start_fetch();
    }

    // ── Transport calls ──────────────────────────────────────────

    fn start_fetch(&mut self) {
        let epoch = self.monitor.epoch();
        if self.fetching == Some(epoch) {
            return;
        }
        self.fetching = Some(epoch);
        let transport = Arc::clone(&self.dispatcher.inner.transport);
        let interface_id = self.interface_id.clone();
        debug!(interface_id = %interface_id, epoch, "fetching current values");
        self.pending.push(Box::pin(async move {
            let result = transport.bulk_read(&interface_id).await;
            Completion::Fetch { epoch, result }
        }));
    }

    fn begin_reconnect(&mut self) {
        if self.reconnect_in_flight {
            return;
        }
        self.reconnect_in_flight = true;
        self.reconnect_at = None;
        let transport = Arc::clone(&self.dispatcher.inner.transport);
        let interface_id = self.interface_id.clone();
        info!(
            interface_id = %interface_id,
            attempt = self.reconnect_attempt + 1,
            "reconnecting interface"
        );
        self.pending.push(Box::pin(async move {
            let result = transport.reconnect(&interface_id).await;
            Completion::Reconnect { result }
        }));
    }

    /// Subscribe to the interface's events. A refused subscription counts
    /// as a lost link.
    fn open_events(&mut self) -> bool {
        match self
            .dispatcher
            .inner
            .transport
            .subscribe_events(&self.interface_id)
        {
            Ok(stream) => {
                self.events = Some(stream);
                true
            }
            Err(e) => {
                self.events = None;
                let reason = e.to_string();
                self.on_link_lost(Some(&reason));
                false
            }
        }
    }

    // ── Inbound ──────────────────────────────────────────────────

    fn on_control(&mut self, control: ReactorControl) {
        match control {
            ReactorControl::Reconnect { reply } => {
                if self.monitor.state() != InterfaceState::Failed {
                    let _ = reply.send(Ok(()));
                    return;
                }
                self.reconnect_waiters.push(reply);
                self.reconnect_attempt = 0;
                self.begin_reconnect();
            }
        }
    }

    fn on_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Event(event) => {
                let key = ParameterKey::new(
                    self.interface_id.clone(),
                    event.device,
                    event.channel,
                    event.parameter,
                );
                self.dispatcher
                    .apply_value(&key, event.value, UpdateSource::Event);
                let signal = self.monitor.record_data_event(Instant::now());
                self.publish(signal.into_iter().collect());
            }
            TransportEvent::Pong(ack) => {
                let signal = self.monitor.record_ack(ack.seq, Instant::now());
                self.publish(signal.into_iter().collect());
            }
            TransportEvent::HubRestarted => {
                let updates = self.dispatcher.inner.values.mark_uncertain(&self.interface_id);
                warn!(
                    interface_id = %self.interface_id,
                    uncertain = updates.len(),
                    "hub restarted, cached values need confirmation"
                );
                for update in &updates {
                    self.dispatcher.notify(update);
                }
            }
            TransportEvent::Disconnected { reason } => self.on_link_lost(reason.as_deref()),
            TransportEvent::Reconnected => {
                if self.monitor.state() == InterfaceState::Failed {
                    self.on_link_restored(false);
                }
            }
        }
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Probe { epoch, seq, result } => self.on_probe_done(epoch, seq, result),
            Completion::Fetch { epoch, result } => self.on_fetch_done(epoch, result),
            Completion::Reconnect { result } => {
                self.reconnect_in_flight = false;
                match result {
                    Ok(()) => self.on_link_restored(true),
                    Err(e) => {
                        self.reconnect_attempt += 1;
                        warn!(
                            interface_id = %self.interface_id,
                            attempt = self.reconnect_attempt,
                            error = %e,
                            "reconnect failed"
                        );
                        self.reply_waiters(|| Err(CoreError::Transport(e.clone())));
                        self.schedule_reconnect();
                    }
                }
            }
        }
    }

    fn on_probe_done(&mut self, epoch: u64, seq: u64, result: Result<Ack, hubsync_api::Error>) {
        if epoch != self.monitor.epoch() {
            debug!(interface_id = %self.interface_id, seq, "ignoring probe from previous epoch");
            return;
        }
        match result {
            Ok(ack) => {
                let signal = self.monitor.record_ack(ack.seq, Instant::now());
                self.publish(signal.into_iter().collect());
            }
            Err(hubsync_api::Error::Timeout { .. }) => {
                debug!(interface_id = %self.interface_id, seq, "probe unanswered");
            }
            Err(e) if e.is_disconnect() => {
                self.monitor.probe_failed(seq);
                let reason = e.to_string();
                self.on_link_lost(Some(&reason));
            }
            Err(e) => {
                warn!(interface_id = %self.interface_id, seq, error = %e, "probe failed");
                self.monitor.probe_failed(seq);
            }
        }
    }

    fn on_fetch_done(&mut self, epoch: u64, result: Result<BulkValues, hubsync_api::Error>) {
        if self.fetching == Some(epoch) {
            self.fetching = None;
        }
        if epoch != self.monitor.epoch() || self.monitor.state() == InterfaceState::Failed {
            debug!(interface_id = %self.interface_id, epoch, "discarding fetch from lost link");
            return;
        }
        match result {
            Ok(values) => {
                let mut applied = 0usize;
                for channel in values {
                    for (parameter, value) in channel.values {
                        let key = ParameterKey::new(
                            self.interface_id.clone(),
                            channel.device.clone(),
                            channel.channel,
                            parameter,
                        );
                        self.dispatcher
                            .apply_value(&key, value, UpdateSource::InitialFetch);
                        applied += 1;
                    }
                }
                info!(interface_id = %self.interface_id, values = applied, "fetched current values");
                let signal = self.monitor.record_data_event(Instant::now());
                self.publish(signal.into_iter().collect());
            }
            Err(e) => {
                warn!(interface_id = %self.interface_id, error = %e, "fetching values failed");
                if e.is_disconnect() {
                    let reason = e.to_string();
                    self.on_link_lost(Some(&reason));
                }
            }
        }
    }

    // ── Link lifecycle ───────────────────────────────────────────

    fn on_link_lost(&mut self, reason: Option<&str>) {
        if self.monitor.state() == InterfaceState::Failed {
            return;
        }
        warn!(
            interface_id = %self.interface_id,
            reason = reason.unwrap_or("unknown"),
            "interface link lost"
        );
        let signal = self.monitor.record_disconnect();
        self.publish(signal.into_iter().collect());
        self.reconnect_attempt = 0;
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        if !self.reconnect.enabled {
            info!(interface_id = %self.interface_id, "automatic reconnect disabled");
            return;
        }
        if let Some(max) = self.reconnect.max_retries {
            if self.reconnect_attempt >= max {
                warn!(
                    interface_id = %self.interface_id,
                    attempts = self.reconnect_attempt,
                    "giving up on automatic reconnect"
                );
                self.dispatcher.emit(Diagnostic::ReconnectGaveUp {
                    interface_id: self.interface_id.clone(),
                    attempts: self.reconnect_attempt,
                });
                return;
            }
        }
        let delay = calculate_backoff(self.reconnect_attempt, &self.reconnect);
        debug!(
            interface_id = %self.interface_id,
            attempt = self.reconnect_attempt,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "scheduling reconnect"
        );
        self.reconnect_at = Some(Instant::now() + delay);
    }

    /// `FAILED → CONNECTING`: new epoch, fresh subscription if the
    /// transport lost the old one, then a fetch and an immediate probe.
    fn on_link_restored(&mut self, resubscribe: bool) {
        if self.monitor.state() != InterfaceState::Failed {
            self.reply_waiters(|| Ok(()));
            return;
        }
        self.reconnect_at = None;
        self.reconnect_attempt = 0;
        let signal = self.monitor.reconnected(Instant::now());
        self.publish(signal.into_iter().collect());

        if (resubscribe || self.events.is_none()) && !self.open_events() {
            let interface_id = self.interface_id.to_string();
            self.reply_waiters(move || {
                Err(CoreError::InterfaceUnavailable {
                    interface_id: interface_id.clone(),
                    reason: "event subscription refused",
                })
            });
            return;
        }
        self.start_fetch();
        self.on_probe_tick();
        self.reply_waiters(|| Ok(()));
    }

    fn reply_waiters(&mut self, result: impl Fn() -> Result<(), CoreError>) {
        for waiter in self.reconnect_waiters.drain(..) {
            let _ = waiter.send(result());
        }
    }

    fn publish(&self, signals: Vec<HealthSignal>) {
        self.dispatcher
            .publish_health(&self.monitor.status(), signals);
    }
}

async fn next_event(events: &mut Option<EventStream>) -> Option<TransportEvent> {
    match events {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn tick_opt(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
