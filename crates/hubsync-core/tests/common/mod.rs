// Scripted in-memory hub shared by the dispatcher integration tests.
#![allow(clippy::unwrap_used, dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hubsync_api::{
    Ack, BulkValues, ChannelValues, DeviceAddress, Error, EventStream, InterfaceId, ParamValue,
    Paramset, Transport, TransportEvent,
};
use hubsync_core::{
    InterfaceConfig, MemoryValueStore, ParameterUpdate, SyncConfig, SyncDispatcher,
};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use url::Url;

pub const IFACE: &str = "HmIP-RF";
pub const THERMOSTAT: &str = "000A1B2C3D4E5F";
pub const SECOND_THERMOSTAT: &str = "000A1B2C3D4E60";

/// How the fake hub answers liveness probes. `n` counts probes from 0.
#[derive(Clone, Copy)]
pub enum ProbePolicy {
    AckAll,
    AckWhen(fn(u64) -> bool),
    Disconnected,
}

/// Transport calls in the order they reached the fake hub.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    BulkRead(InterfaceId),
    ReadParameter(String),
    WriteParameter(String),
    PutStart(DeviceAddress, Vec<String>),
    PutEnd(DeviceAddress),
    Reconnect(InterfaceId),
}

struct State {
    event_txs: HashMap<InterfaceId, mpsc::UnboundedSender<TransportEvent>>,
    bulk: HashMap<InterfaceId, BulkValues>,
    points: HashMap<(DeviceAddress, u32, String), ParamValue>,
    paramsets: HashMap<(DeviceAddress, u32), Paramset>,
    hold_reads: bool,
    probe_policy: ProbePolicy,
    probes: u64,
    reconnect_ok: bool,
    calls: Vec<Call>,
}

pub struct FakeTransport {
    state: Mutex<State>,
    bulk_open: watch::Sender<bool>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        let (bulk_open, _) = watch::channel(true);
        Arc::new(Self {
            state: Mutex::new(State {
                event_txs: HashMap::new(),
                bulk: HashMap::new(),
                points: HashMap::new(),
                paramsets: HashMap::new(),
                hold_reads: false,
                probe_policy: ProbePolicy::AckAll,
                probes: 0,
                reconnect_ok: true,
                calls: Vec::new(),
            }),
            bulk_open,
        })
    }

    // ── Scripting ───────────────────────────────────────────────────

    pub fn set_bulk(&self, interface_id: &str, values: BulkValues) {
        self.state
            .lock()
            .unwrap()
            .bulk
            .insert(InterfaceId::new(interface_id), values);
    }

    /// Bulk reads wait until the fetch gate is open again.
    pub fn set_bulk_open(&self, open: bool) {
        self.bulk_open.send_replace(open);
    }

    pub fn set_point(&self, device: &str, channel: u32, parameter: &str, value: ParamValue) {
        self.state.lock().unwrap().points.insert(
            (DeviceAddress::new(device), channel, parameter.to_owned()),
            value,
        );
    }

    /// Point reads never complete while held.
    pub fn hold_reads(&self, hold: bool) {
        self.state.lock().unwrap().hold_reads = hold;
    }

    pub fn set_paramset(&self, device: &str, channel: u32, paramset: Paramset) {
        self.state
            .lock()
            .unwrap()
            .paramsets
            .insert((DeviceAddress::new(device), channel), paramset);
    }

    pub fn paramset(&self, device: &str, channel: u32) -> Paramset {
        self.state
            .lock()
            .unwrap()
            .paramsets
            .get(&(DeviceAddress::new(device), channel))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_probe_policy(&self, policy: ProbePolicy) {
        self.state.lock().unwrap().probe_policy = policy;
    }

    pub fn set_reconnect_ok(&self, ok: bool) {
        self.state.lock().unwrap().reconnect_ok = ok;
    }

    /// Push an event to the current subscriber. `false` if nobody listens.
    pub fn push(&self, interface_id: &str, event: TransportEvent) -> bool {
        self.state
            .lock()
            .unwrap()
            .event_txs
            .get(&InterfaceId::new(interface_id))
            .is_some_and(|tx| tx.send(event).is_ok())
    }

    // ── Inspection ──────────────────────────────────────────────────

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.state.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn probes(&self) -> u64 {
        self.state.lock().unwrap().probes
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send_probe(&self, interface_id: &InterfaceId, seq: u64) -> Result<Ack, Error> {
        let (policy, n) = {
            let mut state = self.state.lock().unwrap();
            let n = state.probes;
            state.probes += 1;
            (state.probe_policy, n)
        };
        match policy {
            ProbePolicy::AckAll => Ok(Ack { seq }),
            ProbePolicy::AckWhen(ack) if ack(n) => Ok(Ack { seq }),
            ProbePolicy::AckWhen(_) => Err(Error::Timeout { timeout_ms: 0 }),
            ProbePolicy::Disconnected => Err(Error::Disconnected {
                interface_id: interface_id.to_string(),
            }),
        }
    }

    fn subscribe_events(&self, interface_id: &InterfaceId) -> Result<EventStream, Error> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .unwrap()
            .event_txs
            .insert(interface_id.clone(), tx);
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }

    async fn read_parameter(
        &self,
        _interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
        parameter: &str,
    ) -> Result<ParamValue, Error> {
        self.record(Call::ReadParameter(parameter.to_owned()));
        let (hold, value) = {
            let state = self.state.lock().unwrap();
            let value = state
                .points
                .get(&(device.clone(), channel, parameter.to_owned()))
                .cloned();
            (state.hold_reads, value)
        };
        if hold {
            std::future::pending::<()>().await;
        }
        value.ok_or_else(|| Error::UnknownAddress(format!("{device}:{channel}")))
    }

    async fn write_parameter(
        &self,
        _interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
        parameter: &str,
        value: &ParamValue,
    ) -> Result<(), Error> {
        self.record(Call::WriteParameter(parameter.to_owned()));
        self.state.lock().unwrap().points.insert(
            (device.clone(), channel, parameter.to_owned()),
            value.clone(),
        );
        Ok(())
    }

    async fn read_paramset(
        &self,
        _interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
    ) -> Result<Paramset, Error> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .paramsets
            .get(&(device.clone(), channel))
            .cloned()
            .unwrap_or_default())
    }

    async fn put_paramset(
        &self,
        _interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
        paramset: &Paramset,
    ) -> Result<(), Error> {
        self.record(Call::PutStart(
            device.clone(),
            paramset.keys().cloned().collect(),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        {
            let mut state = self.state.lock().unwrap();
            let stored = state
                .paramsets
                .entry((device.clone(), channel))
                .or_default();
            stored.extend(paramset.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.record(Call::PutEnd(device.clone()));
        Ok(())
    }

    async fn bulk_read(&self, interface_id: &InterfaceId) -> Result<BulkValues, Error> {
        self.record(Call::BulkRead(interface_id.clone()));
        let mut open = self.bulk_open.subscribe();
        open.wait_for(|open| *open)
            .await
            .map_err(|_| Error::Disconnected {
                interface_id: interface_id.to_string(),
            })?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .bulk
            .get(interface_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn reconnect(&self, interface_id: &InterfaceId) -> Result<(), Error> {
        self.record(Call::Reconnect(interface_id.clone()));
        if self.state.lock().unwrap().reconnect_ok {
            Ok(())
        } else {
            Err(Error::Disconnected {
                interface_id: interface_id.to_string(),
            })
        }
    }
}

// ── Fixtures ────────────────────────────────────────────────────────

pub fn config() -> SyncConfig {
    SyncConfig::new(
        Url::parse("http://ccu.local:2010").unwrap(),
        vec![InterfaceConfig::new(IFACE)],
    )
}

pub fn dispatcher(transport: &Arc<FakeTransport>) -> SyncDispatcher {
    dispatcher_with(config(), transport, Arc::new(MemoryValueStore::new()))
}

pub fn dispatcher_with(
    config: SyncConfig,
    transport: &Arc<FakeTransport>,
    store: Arc<MemoryValueStore>,
) -> SyncDispatcher {
    SyncDispatcher::new(config, Arc::clone(transport) as Arc<dyn Transport>, store)
}

pub fn channel_values(device: &str, channel: u32, values: &[(&str, ParamValue)]) -> ChannelValues {
    ChannelValues {
        device: DeviceAddress::new(device),
        channel,
        values: values
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect(),
    }
}

/// Observer that keeps every update it sees.
pub fn recorder() -> (
    Arc<Mutex<Vec<ParameterUpdate>>>,
    Arc<dyn hubsync_core::ValueObserver>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer = move |update: &ParameterUpdate| sink.lock().unwrap().push(update.clone());
    (seen, Arc::new(observer))
}

/// Poll `cond` while virtual time moves forward in small steps.
pub async fn eventually(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {what}");
}
