// ── Diagnostic stream ──
//
// Conflict signals and interface transitions, broadcast to whoever
// listens. Slow listeners lose the oldest diagnostics, never block the
// reactors.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use hubsync_api::InterfaceId;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

use crate::health::{ConflictSignal, HubHealth, InterfaceState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Diagnostic {
    Conflict(ConflictSignal),
    InterfaceStateChanged {
        interface_id: InterfaceId,
        from: InterfaceState,
        to: InterfaceState,
    },
    HubHealthChanged {
        from: HubHealth,
        to: HubHealth,
    },
    /// Automatic reconnection stopped after `attempts` failures; only a
    /// manual reconnect revives the interface.
    ReconnectGaveUp {
        interface_id: InterfaceId,
        attempts: u32,
    },
}

/// `Stream` of diagnostics that skips over lag instead of ending.
pub struct DiagnosticStream {
    inner: BroadcastStream<Diagnostic>,
}

impl DiagnosticStream {
    pub(crate) fn new(receiver: broadcast::Receiver<Diagnostic>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl Stream for DiagnosticStream {
    type Item = Diagnostic;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(diagnostic))) => return Poll::Ready(Some(diagnostic)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(skipped, "diagnostic listener lagged");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
