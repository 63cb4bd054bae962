//! Push events delivered by a transport.
//!
//! A transport yields a [`TransportEvent`] for every inbound notification on
//! an interface: parameter changes, liveness acknowledgements that did not
//! belong to an outstanding probe, hub restarts, and link state changes.
//!
//! Transports that speak JSON can use [`TransportEvent::from_json`] to decode
//! the `{ "method": ..., "params": ... }` envelope; anything else builds the
//! enum directly.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::types::{DeviceAddress, ParamValue};

/// A parameter change pushed by the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDeviceEvent", into = "RawDeviceEvent")]
pub struct DeviceEvent {
    pub device: DeviceAddress,
    pub channel: u32,
    pub parameter: String,
    pub value: ParamValue,
}

/// Liveness acknowledgement (PONG) for a probe sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub seq: u64,
}

/// Everything an interface's event stream can deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum TransportEvent {
    /// A parameter value changed on a device.
    Event(DeviceEvent),
    /// An acknowledgement that arrived outside a `send_probe` call, e.g.
    /// one relayed from another consumer sharing this identity.
    Pong(Ack),
    /// The hub behind this interface restarted; cached values may be stale.
    HubRestarted,
    /// The transport lost the link.
    Disconnected {
        #[serde(default)]
        reason: Option<String>,
    },
    /// The transport re-established the link on its own.
    Reconnected,
}

impl TransportEvent {
    /// Decode a JSON envelope such as
    /// `{"method":"event","params":{"address":"ABC:1","parameter":"LEVEL","value":0.5}}`.
    pub fn from_json(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| {
            tracing::debug!(error = %e, "failed to decode transport event");
            Error::Protocol(format!("invalid event envelope: {e}"))
        })
    }
}

// ── Wire form ────────────────────────────────────────────────────────

/// The hub addresses channels as `ADDRESS:CHANNEL`.
#[derive(Serialize, Deserialize)]
struct RawDeviceEvent {
    address: String,
    parameter: String,
    value: ParamValue,
}

impl TryFrom<RawDeviceEvent> for DeviceEvent {
    type Error = String;

    fn try_from(raw: RawDeviceEvent) -> Result<Self, Self::Error> {
        let (device, channel) = raw
            .address
            .rsplit_once(':')
            .ok_or_else(|| format!("address '{}' has no channel suffix", raw.address))?;
        let channel = channel
            .parse()
            .map_err(|_| format!("address '{}' has a non-numeric channel", raw.address))?;
        Ok(Self {
            device: DeviceAddress::new(device),
            channel,
            parameter: raw.parameter,
            value: raw.value,
        })
    }
}

impl From<DeviceEvent> for RawDeviceEvent {
    fn from(event: DeviceEvent) -> Self {
        Self {
            address: event.device.channel_address(event.channel),
            parameter: event.parameter,
            value: event.value,
        }
    }
}
