// hubsync-api: transport-facing vocabulary for hub state synchronization.

pub mod error;
pub mod event;
pub mod transport;
pub mod types;

pub use error::Error;
pub use event::{Ack, DeviceEvent, TransportEvent};
pub use transport::{EventStream, Transport};
pub use types::{BulkValues, ChannelValues, DeviceAddress, InterfaceId, ParamValue, Paramset};
