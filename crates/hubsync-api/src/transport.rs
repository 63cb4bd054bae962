// ── Transport seam ──
//
// The remote-procedure wire encoding lives behind this trait. The core
// only sees typed calls and a push-event stream per interface.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::error::Error;
use crate::event::{Ack, TransportEvent};
use crate::types::{BulkValues, DeviceAddress, InterfaceId, ParamValue, Paramset};

/// Push events for one interface. Ends when the transport shuts down.
pub type EventStream = Pin<Box<dyn Stream<Item = TransportEvent> + Send>>;

/// Request/response and push access to a hub.
///
/// Implementations must deliver events of one interface in order.
/// Every call may suspend until the hub answers or the transport's own
/// timeout fires.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Send a liveness probe and wait for its acknowledgement.
    async fn send_probe(&self, interface_id: &InterfaceId, seq: u64) -> Result<Ack, Error>;

    /// Open the push-event stream of an interface.
    fn subscribe_events(&self, interface_id: &InterfaceId) -> Result<EventStream, Error>;

    /// Point read of a single parameter.
    async fn read_parameter(
        &self,
        interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
        parameter: &str,
    ) -> Result<ParamValue, Error>;

    /// Write a single parameter.
    async fn write_parameter(
        &self,
        interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
        parameter: &str,
        value: &ParamValue,
    ) -> Result<(), Error>;

    /// Read a channel's master paramset (where schedules live).
    async fn read_paramset(
        &self,
        interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
    ) -> Result<Paramset, Error>;

    /// Write several fields of a channel's master paramset in one round-trip.
    async fn put_paramset(
        &self,
        interface_id: &InterfaceId,
        device: &DeviceAddress,
        channel: u32,
        values: &Paramset,
    ) -> Result<(), Error>;

    /// Read every value the interface exposes.
    async fn bulk_read(&self, interface_id: &InterfaceId) -> Result<BulkValues, Error>;

    /// Re-establish the link of a failed interface.
    async fn reconnect(&self, interface_id: &InterfaceId) -> Result<(), Error>;
}
