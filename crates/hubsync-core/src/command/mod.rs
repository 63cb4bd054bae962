// ── Device write commands ──
//
// Every write to a device flows through that device's queue and is
// executed by one worker task, so writes to a device never overlap while
// different devices proceed in parallel.

mod worker;

use hubsync_api::{InterfaceId, ParamValue, Paramset};
use tokio::sync::oneshot;

use crate::error::CoreError;
use crate::schedule::{ScheduleProfile, Weekday};

pub(crate) use worker::WriteQueues;

/// One unit of work for a device worker. Executed as a whole before the
/// next job starts.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum WriteJob {
    Parameter {
        channel: u32,
        parameter: String,
        value: ParamValue,
    },
    /// One `put_paramset` per weekday, in order, stopping at the first
    /// failure.
    Schedule {
        channel: u32,
        profile: ScheduleProfile,
        batches: Vec<(Weekday, Paramset)>,
    },
}

impl WriteJob {
    /// Device round-trips this job needs.
    pub(crate) fn round_trips(&self) -> usize {
        match self {
            Self::Parameter { .. } => 1,
            Self::Schedule { batches, .. } => batches.len(),
        }
    }
}

/// A write sent through a device queue, with the channel its result
/// goes back on.
pub(crate) struct WriteEnvelope {
    pub interface_id: InterfaceId,
    pub job: WriteJob,
    pub response_tx: oneshot::Sender<Result<(), CoreError>>,
}
