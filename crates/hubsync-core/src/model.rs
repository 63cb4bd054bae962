// ── Registry model ──
//
// Addressing and classification for everything the dispatcher tracks.

use std::fmt;

use hubsync_api::{DeviceAddress, InterfaceId, ParamValue};
use serde::{Deserialize, Serialize};

use crate::schedule::ScheduleLimits;

/// Address of one parameter: `(interface, device, channel, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParameterKey {
    pub interface_id: InterfaceId,
    pub device: DeviceAddress,
    pub channel: u32,
    pub parameter: String,
}

impl ParameterKey {
    pub fn new(
        interface_id: impl Into<InterfaceId>,
        device: impl Into<DeviceAddress>,
        channel: u32,
        parameter: impl Into<String>,
    ) -> Self {
        Self {
            interface_id: interface_id.into(),
            device: device.into(),
            channel,
            parameter: parameter.into(),
        }
    }
}

impl fmt::Display for ParameterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.interface_id,
            self.device.channel_address(self.channel),
            self.parameter
        )
    }
}

/// What a parameter is, independent of how any consumer renders it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "kind", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ParameterKind {
    Bool,
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Float {
        min: Option<f64>,
        max: Option<f64>,
        unit: Option<String>,
    },
    /// Integer-backed choice; `values[i]` names value `i`.
    Enum { values: Vec<String> },
    Text,
    /// Write-only trigger (press, reset). Never carries a readable value.
    Action,
}

impl ParameterKind {
    /// Best guess for a parameter first seen through an event or a fetch.
    pub fn infer(value: &ParamValue) -> Self {
        match value {
            ParamValue::Bool(_) => Self::Bool,
            ParamValue::Integer(_) => Self::Integer {
                min: None,
                max: None,
            },
            ParamValue::Float(_) => Self::Float {
                min: None,
                max: None,
                unit: None,
            },
            ParamValue::Text(_) => Self::Text,
        }
    }

    pub fn is_readable(&self) -> bool {
        !matches!(self, Self::Action)
    }
}

/// A device the dispatcher can write schedules to.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub interface_id: InterfaceId,
    pub address: DeviceAddress,
    /// Channel whose master paramset holds the week programs.
    pub schedule_channel: u32,
    pub limits: ScheduleLimits,
}

impl DeviceInfo {
    pub fn new(interface_id: impl Into<InterfaceId>, address: impl Into<DeviceAddress>) -> Self {
        Self {
            interface_id: interface_id.into(),
            address: address.into(),
            schedule_channel: 0,
            limits: ScheduleLimits::default(),
        }
    }

    pub fn with_schedule_channel(mut self, channel: u32) -> Self {
        self.schedule_channel = channel;
        self
    }

    pub fn with_limits(mut self, limits: ScheduleLimits) -> Self {
        self.limits = limits;
        self
    }
}
