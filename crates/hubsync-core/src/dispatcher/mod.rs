// ── Sync dispatcher ──
//
// Composition root. Owns the device and parameter registries, runs one
// reactor per enabled interface, routes outbound writes through per-device
// queues, and fans state transitions out to observers.

mod reactor;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwap;
use chrono::Utc;
use dashmap::DashMap;
use hubsync_api::{DeviceAddress, InterfaceId, ParamValue, Paramset, Transport};
use strum::IntoEnumIterator;
use tokio::sync::{Mutex, broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::command::{WriteJob, WriteQueues};
use crate::config::SyncConfig;
use crate::error::CoreError;
use crate::health::{HealthSignal, HealthSnapshot, InterfaceState, InterfaceStatus};
use crate::model::{DeviceInfo, ParameterKey, ParameterKind};
use crate::persist::ValueStore;
use crate::schedule::{
    ScheduleProfile, ScheduleSlot, Weekday, WeekdaySchedule, compact_slots, profile_from_paramset,
    weekday_from_paramset, weekday_to_paramset,
};
use crate::stream::{Diagnostic, DiagnosticStream};
use crate::values::{ParameterUpdate, Reading, UpdateSource, ValueObserver, ValueStateTracker};

use reactor::ReactorControl;

const DIAGNOSTIC_CHANNEL_SIZE: usize = 256;
const CONTROL_CHANNEL_SIZE: usize = 8;

// ── SyncDispatcher ───────────────────────────────────────────────

/// The main entry point for the entity layer.
///
/// Cheaply cloneable via `Arc<DispatcherInner>`. Built once per hub and
/// handed to every collaborator; there is no process-wide instance.
#[derive(Clone)]
pub struct SyncDispatcher {
    inner: Arc<DispatcherInner>,
}

struct InterfaceHandle {
    enabled: bool,
    control_tx: mpsc::Sender<ReactorControl>,
    control_rx: Mutex<Option<mpsc::Receiver<ReactorControl>>>,
    /// Cancelled when the interface fails; replaced on reconnect. Pending
    /// on-demand reads race against it.
    link: ArcSwap<CancellationToken>,
}

struct DispatcherInner {
    config: SyncConfig,
    transport: Arc<dyn Transport>,
    store: Arc<dyn ValueStore>,
    values: ValueStateTracker,
    devices: DashMap<DeviceAddress, DeviceInfo>,
    interfaces: HashMap<InterfaceId, InterfaceHandle>,
    observers: ArcSwap<Vec<Arc<dyn ValueObserver>>>,
    diagnostics: broadcast::Sender<Diagnostic>,
    health: ArcSwap<HealthSnapshot>,
    writes: WriteQueues,
    persist_tx: mpsc::UnboundedSender<(ParameterKey, ParamValue)>,
    persist_rx: Mutex<Option<mpsc::UnboundedReceiver<(ParameterKey, ParamValue)>>>,
    /// Root token: cancelled on abort only.
    cancel: CancellationToken,
    /// Stops reactors and the persistence writer on graceful shutdown.
    reactor_cancel: CancellationToken,
    started: AtomicBool,
    shutting_down: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncDispatcher {
    /// Create a dispatcher. Does NOT touch the hub -- register devices
    /// and parameters, then call [`start()`](Self::start).
    pub fn new(
        config: SyncConfig,
        transport: Arc<dyn Transport>,
        store: Arc<dyn ValueStore>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let reactor_cancel = cancel.child_token();
        let (diagnostics, _) = broadcast::channel(DIAGNOSTIC_CHANNEL_SIZE);
        let (persist_tx, persist_rx) = mpsc::unbounded_channel();

        let interfaces: HashMap<_, _> = config
            .interfaces
            .iter()
            .map(|iface| {
                let (control_tx, control_rx) = mpsc::channel(CONTROL_CHANNEL_SIZE);
                let handle = InterfaceHandle {
                    enabled: iface.enabled,
                    control_tx,
                    control_rx: Mutex::new(Some(control_rx)),
                    link: ArcSwap::from_pointee(cancel.child_token()),
                };
                (iface.id.clone(), handle)
            })
            .collect();

        let health = HealthSnapshot::new(
            config
                .interfaces
                .iter()
                .filter(|i| i.enabled)
                .map(|i| InterfaceStatus::connecting(i.id.clone())),
        );

        let writes = WriteQueues::new(
            Arc::clone(&transport),
            config.write_timeout,
            config.write_queue_depth,
            cancel.clone(),
        );

        Self {
            inner: Arc::new(DispatcherInner {
                values: ValueStateTracker::new(config.force_refresh_interval),
                config,
                transport,
                store,
                devices: DashMap::new(),
                interfaces,
                observers: ArcSwap::from_pointee(Vec::new()),
                diagnostics,
                health: ArcSwap::from_pointee(health),
                writes,
                persist_tx,
                persist_rx: Mutex::new(Some(persist_rx)),
                cancel,
                reactor_cancel,
                started: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    // ── Registries ───────────────────────────────────────────────

    pub fn register_device(&self, info: DeviceInfo) -> Result<(), CoreError> {
        self.available_interface(&info.interface_id)?;
        debug!(device = %info.address, interface_id = %info.interface_id, "device registered");
        self.inner.devices.insert(info.address.clone(), info);
        Ok(())
    }

    pub fn device(&self, address: &DeviceAddress) -> Option<DeviceInfo> {
        self.inner.devices.get(address).map(|d| d.value().clone())
    }

    /// Declare a parameter. Persisted values are restored for parameters
    /// registered before [`start()`](Self::start).
    pub fn register_parameter(
        &self,
        key: ParameterKey,
        kind: ParameterKind,
    ) -> Result<(), CoreError> {
        self.interface(&key.interface_id)?;
        self.inner.values.register(key, kind);
        Ok(())
    }

    /// Add an observer. Observers run synchronously on the dispatch path.
    pub fn subscribe(&self, observer: Arc<dyn ValueObserver>) {
        self.inner.observers.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(Arc::clone(&observer));
            next
        });
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Restore persisted values, then spawn the persistence writer and one
    /// reactor per enabled interface. Each reactor begins with a probe and
    /// an initial fetch.
    pub async fn start(&self) -> Result<(), CoreError> {
        self.ensure_accepting()?;
        if self.inner.started.swap(true, Ordering::AcqRel) {
            debug!("dispatcher already started");
            return Ok(());
        }

        let restored = self.restore_persisted().await;

        let mut handles = self.inner.task_handles.lock().await;
        if let Some(rx) = self.inner.persist_rx.lock().await.take() {
            handles.push(tokio::spawn(persist_task(
                Arc::clone(&self.inner.store),
                rx,
                self.inner.reactor_cancel.clone(),
            )));
        }

        let mut reactors = 0usize;
        for (interface_id, handle) in &self.inner.interfaces {
            if !handle.enabled {
                debug!(interface_id = %interface_id, "interface disabled, not starting");
                continue;
            }
            let Some(control_rx) = handle.control_rx.lock().await.take() else {
                continue;
            };
            handles.push(tokio::spawn(reactor::interface_reactor(
                self.clone(),
                interface_id.clone(),
                control_rx,
                self.inner.reactor_cancel.clone(),
            )));
            reactors += 1;
        }

        info!(
            interfaces = reactors,
            parameters = self.inner.values.len(),
            restored,
            "dispatcher started"
        );
        Ok(())
    }

    /// Graceful shutdown: queued device writes are drained, then the
    /// reactors stop.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("dispatcher shutting down");
        self.inner.writes.drain().await;
        self.inner.reactor_cancel.cancel();
        self.join_tasks().await;
        info!("dispatcher stopped");
    }

    /// Abrupt shutdown: queued writes are dropped and their callers get
    /// [`CoreError::Cancelled`]. Nothing is retried later.
    pub async fn abort(&self) {
        self.inner.shutting_down.store(true, Ordering::Release);
        warn!("dispatcher aborted, pending writes dropped");
        self.inner.cancel.cancel();
        self.inner.writes.close();
        self.join_tasks().await;
    }

    async fn join_tasks(&self) {
        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
    }

    // ── Values ───────────────────────────────────────────────────

    /// Best-known value and its trust state. Never fails: unknown values
    /// read as `NOT_VALID` with no value.
    pub fn read(&self, key: &ParameterKey) -> Reading {
        self.inner.values.read(key)
    }

    /// Point-read one parameter from the hub, at most once per
    /// `force_refresh_interval`. Cancelled if the interface fails first.
    pub async fn force_refresh(&self, key: &ParameterKey) -> Result<Reading, CoreError> {
        self.ensure_accepting()?;
        let handle = self.available_interface(&key.interface_id)?;
        if self.inner.health.load().state_of(&key.interface_id) == Some(InterfaceState::Failed) {
            return Err(CoreError::InterfaceUnavailable {
                interface_id: key.interface_id.to_string(),
                reason: "interface failed",
            });
        }
        self.inner
            .values
            .begin_refresh(key, Instant::now())
            .map_err(|retry_after| CoreError::RateLimited { retry_after })?;

        let link = handle.link.load_full();
        let read = self.inner.transport.read_parameter(
            &key.interface_id,
            &key.device,
            key.channel,
            &key.parameter,
        );
        let value = tokio::select! {
            biased;
            () = link.cancelled() => {
                debug!(key = %key, "refresh cancelled by interface failure");
                return Err(CoreError::Cancelled);
            }
            result = read => result?,
        };

        self.apply_value(key, value, UpdateSource::InitialFetch);
        Ok(self.read(key))
    }

    /// Queue a parameter write behind earlier writes to the same device.
    pub async fn write_parameter(
        &self,
        key: &ParameterKey,
        value: ParamValue,
    ) -> Result<(), CoreError> {
        self.ensure_accepting()?;
        self.available_interface(&key.interface_id)?;
        let job = WriteJob::Parameter {
            channel: key.channel,
            parameter: key.parameter.clone(),
            value,
        };
        self.inner
            .writes
            .submit(&key.interface_id, &key.device, job)
            .await
    }

    // ── Schedules ────────────────────────────────────────────────

    /// Validate one weekday against the device's limits and write it in a
    /// single round-trip.
    pub async fn write_schedule(
        &self,
        device: &DeviceAddress,
        profile: ScheduleProfile,
        weekday: Weekday,
        schedule: &WeekdaySchedule,
    ) -> Result<(), CoreError> {
        self.write_schedule_profile(device, profile, BTreeMap::from([(weekday, schedule.clone())]))
            .await
    }

    /// Validate every weekday first, then write them one round-trip per
    /// weekday inside a single queued job. Nothing is written if any
    /// weekday is invalid.
    pub async fn write_schedule_profile(
        &self,
        device: &DeviceAddress,
        profile: ScheduleProfile,
        schedules: BTreeMap<Weekday, WeekdaySchedule>,
    ) -> Result<(), CoreError> {
        self.ensure_accepting()?;
        let info = self.schedule_target(device)?;
        let batches = schedule_batches(&info, profile, schedules)?;

        if batches.is_empty() {
            return Ok(());
        }
        debug!(device = %device, %profile, weekdays = batches.len(), "queueing schedule write");

        let job = WriteJob::Schedule {
            channel: info.schedule_channel,
            profile,
            batches,
        };
        self.inner
            .writes
            .submit(&info.interface_id, &info.address, job)
            .await
    }

    /// Read one weekday of a profile as stored on the device.
    pub async fn get_schedule_weekday(
        &self,
        device: &DeviceAddress,
        profile: ScheduleProfile,
        weekday: Weekday,
    ) -> Result<Vec<ScheduleSlot>, CoreError> {
        let info = self.device_info(device)?;
        let paramset = self.read_schedule_paramset(&info).await?;
        weekday_from_paramset(profile, weekday, &paramset).map_err(|source| {
            CoreError::Validation {
                profile,
                weekday,
                source,
            }
        })
    }

    /// Read every weekday of a profile present on the device.
    pub async fn get_schedule_profile(
        &self,
        device: &DeviceAddress,
        profile: ScheduleProfile,
    ) -> Result<BTreeMap<Weekday, Vec<ScheduleSlot>>, CoreError> {
        let info = self.device_info(device)?;
        let paramset = self.read_schedule_paramset(&info).await?;
        profile_from_paramset(profile, &paramset).map_err(|e| CoreError::Validation {
            profile,
            weekday: e.weekday,
            source: e.source,
        })
    }

    /// Copy a whole profile, possibly between devices. The copy is
    /// validated against the target device's limits.
    pub async fn copy_schedule_profile(
        &self,
        source: &DeviceAddress,
        source_profile: ScheduleProfile,
        target: &DeviceAddress,
        target_profile: ScheduleProfile,
    ) -> Result<(), CoreError> {
        let profile = self.get_schedule_profile(source, source_profile).await?;
        let schedules = profile
            .into_iter()
            .map(|(weekday, slots)| {
                let meaningful = compact_slots(&slots).to_vec();
                (weekday, WeekdaySchedule::Canonical(meaningful))
            })
            .collect();
        info!(
            source = %source,
            %source_profile,
            target = %target,
            %target_profile,
            "copying schedule profile"
        );
        self.write_schedule_profile(target, target_profile, schedules)
            .await
    }

    /// Copy every profile stored on `source` to `target`. All profiles are
    /// validated against the target's limits before the first write, so an
    /// invalid profile leaves the target untouched.
    pub async fn copy_schedule(
        &self,
        source: &DeviceAddress,
        target: &DeviceAddress,
    ) -> Result<(), CoreError> {
        self.ensure_accepting()?;
        let source_info = self.device_info(source)?;
        let target_info = self.schedule_target(target)?;
        let paramset = self.read_schedule_paramset(&source_info).await?;

        let mut jobs = Vec::new();
        for profile in ScheduleProfile::iter() {
            let stored = profile_from_paramset(profile, &paramset).map_err(|e| {
                CoreError::Validation {
                    profile,
                    weekday: e.weekday,
                    source: e.source,
                }
            })?;
            let schedules = stored
                .into_iter()
                .map(|(weekday, slots)| {
                    let meaningful = compact_slots(&slots).to_vec();
                    (weekday, WeekdaySchedule::Canonical(meaningful))
                })
                .collect();
            let batches = schedule_batches(&target_info, profile, schedules)?;
            if !batches.is_empty() {
                jobs.push(WriteJob::Schedule {
                    channel: target_info.schedule_channel,
                    profile,
                    batches,
                });
            }
        }

        info!(source = %source, target = %target, profiles = jobs.len(), "copying schedules");
        for job in jobs {
            self.inner
                .writes
                .submit(&target_info.interface_id, &target_info.address, job)
                .await?;
        }
        Ok(())
    }

    async fn read_schedule_paramset(&self, info: &DeviceInfo) -> Result<Paramset, CoreError> {
        self.available_interface(&info.interface_id)?;
        let paramset = self
            .inner
            .transport
            .read_paramset(&info.interface_id, &info.address, info.schedule_channel)
            .await?;
        Ok(paramset)
    }

    // ── Health ───────────────────────────────────────────────────

    pub fn connection_health(&self, interface_id: &InterfaceId) -> Result<InterfaceState, CoreError> {
        self.available_interface(interface_id)?;
        Ok(self
            .inner
            .health
            .load()
            .state_of(interface_id)
            .unwrap_or(InterfaceState::Connecting))
    }

    /// Immutable view across all interfaces, replaced after every
    /// transition.
    pub fn health_snapshot(&self) -> Arc<HealthSnapshot> {
        self.inner.health.load_full()
    }

    /// Conflict signals and state transitions from now on.
    pub fn diagnostics(&self) -> DiagnosticStream {
        DiagnosticStream::new(self.inner.diagnostics.subscribe())
    }

    /// Ask a failed interface to reconnect now, resetting its backoff.
    /// A no-op for interfaces that have not failed.
    pub async fn reconnect(&self, interface_id: &InterfaceId) -> Result<(), CoreError> {
        self.ensure_accepting()?;
        let handle = self.available_interface(interface_id)?;
        if !self.inner.started.load(Ordering::Acquire) {
            return Err(CoreError::InterfaceUnavailable {
                interface_id: interface_id.to_string(),
                reason: "dispatcher not started",
            });
        }
        let (reply, response) = oneshot::channel();
        handle
            .control_tx
            .send(ReactorControl::Reconnect { reply })
            .await
            .map_err(|_| CoreError::ShuttingDown)?;
        response.await.map_err(|_| CoreError::ShuttingDown)?
    }

    // ── Internals ────────────────────────────────────────────────

    fn ensure_accepting(&self) -> Result<(), CoreError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            Err(CoreError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    fn interface(&self, interface_id: &InterfaceId) -> Result<&InterfaceHandle, CoreError> {
        self.inner
            .interfaces
            .get(interface_id)
            .ok_or_else(|| CoreError::UnknownInterface {
                interface_id: interface_id.to_string(),
            })
    }

    fn available_interface(&self, interface_id: &InterfaceId) -> Result<&InterfaceHandle, CoreError> {
        let handle = self.interface(interface_id)?;
        if !handle.enabled {
            return Err(CoreError::InterfaceUnavailable {
                interface_id: interface_id.to_string(),
                reason: "interface disabled",
            });
        }
        Ok(handle)
    }

    fn device_info(&self, address: &DeviceAddress) -> Result<DeviceInfo, CoreError> {
        self.device(address).ok_or_else(|| CoreError::UnknownDevice {
            address: address.to_string(),
        })
    }

    fn schedule_target(&self, address: &DeviceAddress) -> Result<DeviceInfo, CoreError> {
        let info = self.device_info(address)?;
        self.available_interface(&info.interface_id)?;
        Ok(info)
    }

    async fn restore_persisted(&self) -> usize {
        let mut restored = 0;
        for key in self.inner.values.keys() {
            if !self.inner.values.kind(&key).is_some_and(|k| k.is_readable()) {
                continue;
            }
            match self.inner.store.load(&key).await {
                Ok(Some(value)) => {
                    if let Some(update) = self.inner.values.restore(&key, value, Utc::now()) {
                        self.notify(&update);
                        restored += 1;
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "failed to load persisted value"),
            }
        }
        restored
    }

    /// `* → VALID`, write-through to the store, then observers.
    fn apply_value(&self, key: &ParameterKey, value: ParamValue, source: UpdateSource) {
        let update = self
            .inner
            .values
            .apply(key, value.clone(), source, Utc::now());
        if self.inner.persist_tx.send((key.clone(), value)).is_err() {
            debug!(key = %key, "persistence writer stopped, value not saved");
        }
        self.notify(&update);
    }

    fn notify(&self, update: &ParameterUpdate) {
        for observer in self.inner.observers.load().iter() {
            observer.on_update(update);
        }
    }

    /// Publish an interface's status and surface its signals. Failing an
    /// interface cancels its link token; recovering replaces it.
    fn publish_health(&self, status: &InterfaceStatus, signals: Vec<HealthSignal>) {
        let interface_id = status.interface_id.clone();
        let previous = self
            .inner
            .health
            .rcu(|current| current.with_status(status.clone()));
        let hub = previous.with_status(status.clone()).hub;

        for signal in signals {
            match signal {
                HealthSignal::StateChanged { from, to } => {
                    match to {
                        InterfaceState::Failed | InterfaceState::Degraded => {
                            warn!(interface_id = %interface_id, %from, %to, "interface state changed");
                        }
                        _ => info!(interface_id = %interface_id, %from, %to, "interface state changed"),
                    }
                    if let Some(handle) = self.inner.interfaces.get(&interface_id) {
                        if to == InterfaceState::Failed {
                            handle.link.load().cancel();
                        } else if from == InterfaceState::Failed {
                            handle.link.store(Arc::new(self.inner.cancel.child_token()));
                        }
                    }
                    let _ = self.inner.diagnostics.send(Diagnostic::InterfaceStateChanged {
                        interface_id: interface_id.clone(),
                        from,
                        to,
                    });
                }
                HealthSignal::Conflict(conflict) => {
                    let _ = self.inner.diagnostics.send(Diagnostic::Conflict(conflict));
                }
            }
        }

        if previous.hub != hub {
            info!(from = %previous.hub, to = %hub, "hub health changed");
            let _ = self.inner.diagnostics.send(Diagnostic::HubHealthChanged {
                from: previous.hub,
                to: hub,
            });
        }
    }

    fn emit(&self, diagnostic: Diagnostic) {
        let _ = self.inner.diagnostics.send(diagnostic);
    }
}

/// Write confirmed values through to the store in arrival order.
async fn persist_task(
    store: Arc<dyn ValueStore>,
    mut rx: mpsc::UnboundedReceiver<(ParameterKey, ParamValue)>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                while let Ok((key, value)) = rx.try_recv() {
                    save(store.as_ref(), &key, &value).await;
                }
                break;
            }
            item = rx.recv() => {
                let Some((key, value)) = item else { break };
                save(store.as_ref(), &key, &value).await;
            }
        }
    }
}

async fn save(store: &dyn ValueStore, key: &ParameterKey, value: &ParamValue) {
    if let Err(e) = store.save(key, value).await {
        warn!(key = %key, error = %e, "failed to persist value");
    }
}

/// Validate each weekday against the device's limits and encode it.
fn schedule_batches(
    info: &DeviceInfo,
    profile: ScheduleProfile,
    schedules: BTreeMap<Weekday, WeekdaySchedule>,
) -> Result<Vec<(Weekday, Paramset)>, CoreError> {
    schedules
        .into_iter()
        .map(|(weekday, schedule)| {
            let slots = schedule
                .to_canonical(&info.limits)
                .map_err(|source| CoreError::Validation {
                    profile,
                    weekday,
                    source,
                })?;
            Ok((weekday, weekday_to_paramset(profile, weekday, &slots)))
        })
        .collect()
}
