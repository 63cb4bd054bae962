// ── Core error types ──
//
// Caller-facing errors from hubsync-core. Connection health transitions
// and conflict signals are NOT errors; they travel on the diagnostic
// stream. A read of an unknown value is not an error either.

use std::time::Duration;

use thiserror::Error;

use crate::schedule::{ScheduleError, ScheduleProfile, Weekday};

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Input errors ─────────────────────────────────────────────────
    /// Rejected before anything reached the transport.
    #[error("Invalid schedule for {profile} {weekday}: {source}")]
    Validation {
        profile: ScheduleProfile,
        weekday: Weekday,
        #[source]
        source: ScheduleError,
    },

    // ── Transport errors ─────────────────────────────────────────────
    /// Timeout, disconnect, or hub rejection. Writes are never retried.
    #[error("Transport error: {0}")]
    Transport(#[from] hubsync_api::Error),

    /// The owning interface failed, or the dispatcher was aborted, while
    /// the operation was in flight.
    #[error("Operation cancelled by a connection state change")]
    Cancelled,

    #[error("Refresh rate-limited, retry after {}s", retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    // ── Addressing errors ────────────────────────────────────────────
    #[error("Device not registered: {address}")]
    UnknownDevice { address: String },

    #[error("Interface not configured: {interface_id}")]
    UnknownInterface { interface_id: String },

    #[error("Interface {interface_id} is unavailable: {reason}")]
    InterfaceUnavailable {
        interface_id: String,
        reason: &'static str,
    },

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Dispatcher is shutting down")]
    ShuttingDown,
}

impl CoreError {
    /// Returns `true` for failures the caller may retry after the
    /// connection recovers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::Cancelled | Self::RateLimited { .. } | Self::InterfaceUnavailable { .. } => true,
            _ => false,
        }
    }
}
