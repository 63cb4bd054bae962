use thiserror::Error;

/// Top-level error type for the `hubsync-api` crate.
///
/// Covers every failure mode a [`Transport`](crate::Transport) can report.
/// `hubsync-core` maps these into caller-facing diagnostics.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Liveness ────────────────────────────────────────────────────
    /// The hub did not answer within the transport's deadline.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The connection to the hub interface is down.
    #[error("Interface {interface_id} is disconnected")]
    Disconnected { interface_id: String },

    // ── Hub responses ───────────────────────────────────────────────
    /// The hub understood the request and refused it.
    #[error("Request rejected by hub: {message}")]
    Rejected { message: String },

    /// Malformed or unexpected data on the wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    // ── Addressing ──────────────────────────────────────────────────
    /// No interface with this id is known to the transport.
    #[error("Unknown interface: {0}")]
    UnknownInterface(String),

    /// The device or channel does not exist on the hub.
    #[error("Unknown address: {0}")]
    UnknownAddress(String),

    /// The operation is not available on this interface.
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying on the
    /// next scheduled attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Disconnected { .. })
    }

    /// Returns `true` if the interface itself is gone (as opposed to a
    /// single failed request).
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Disconnected { .. })
    }
}
