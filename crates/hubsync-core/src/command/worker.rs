use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use hubsync_api::{DeviceAddress, InterfaceId, Transport};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{WriteEnvelope, WriteJob};
use crate::error::CoreError;

struct DeviceWriter {
    tx: mpsc::Sender<WriteEnvelope>,
    handle: JoinHandle<()>,
}

/// Lazily spawned per-device write workers.
pub(crate) struct WriteQueues {
    writers: DashMap<DeviceAddress, DeviceWriter>,
    transport: Arc<dyn Transport>,
    write_timeout: Duration,
    depth: usize,
    closed: AtomicBool,
    /// Cancelled only on abrupt shutdown.
    cancel: CancellationToken,
}

impl WriteQueues {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        write_timeout: Duration,
        depth: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            writers: DashMap::new(),
            transport,
            write_timeout,
            depth: depth.max(1),
            closed: AtomicBool::new(false),
            cancel,
        }
    }

    /// Queue a job behind earlier writes to the same device and wait for
    /// its result.
    pub(crate) async fn submit(
        &self,
        interface_id: &InterfaceId,
        device: &DeviceAddress,
        job: WriteJob,
    ) -> Result<(), CoreError> {
        let tx = self.sender(device)?;
        let (response_tx, response_rx) = oneshot::channel();

        tx.send(WriteEnvelope {
            interface_id: interface_id.clone(),
            job,
            response_tx,
        })
        .await
        .map_err(|_| CoreError::ShuttingDown)?;
        drop(tx);

        // A dropped envelope means the worker was aborted before reaching it.
        response_rx.await.map_err(|_| CoreError::Cancelled)?
    }

    fn sender(&self, device: &DeviceAddress) -> Result<mpsc::Sender<WriteEnvelope>, CoreError> {
        let entry = self.writers.entry(device.clone());
        // Checked under the shard lock: `drain` either finds this writer
        // or we observe `closed`.
        if self.closed.load(Ordering::Acquire) {
            return Err(CoreError::ShuttingDown);
        }
        let writer = entry.or_insert_with(|| {
            let (tx, rx) = mpsc::channel(self.depth);
            let handle = tokio::spawn(device_write_task(
                Arc::clone(&self.transport),
                device.clone(),
                self.write_timeout,
                rx,
                self.cancel.clone(),
            ));
            debug!(device = %device, "spawned device write worker");
            DeviceWriter { tx, handle }
        });
        Ok(writer.tx.clone())
    }

    /// Stop accepting writes and wait for every queued write to finish.
    pub(crate) async fn drain(&self) {
        self.closed.store(true, Ordering::Release);
        let devices: Vec<DeviceAddress> = self.writers.iter().map(|w| w.key().clone()).collect();
        let handles: Vec<JoinHandle<()>> = devices
            .iter()
            .filter_map(|d| self.writers.remove(d))
            .map(|(_, writer)| writer.handle)
            .collect();
        // Dropping the senders above lets each worker run dry and exit.
        for handle in handles {
            let _ = handle.await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.writers.clear();
    }
}

/// Execute one device's writes strictly in arrival order.
async fn device_write_task(
    transport: Arc<dyn Transport>,
    device: DeviceAddress,
    write_timeout: Duration,
    mut rx: mpsc::Receiver<WriteEnvelope>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            envelope = rx.recv() => {
                let Some(envelope) = envelope else { break };
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => Err(CoreError::Cancelled),
                    r = execute(transport.as_ref(), &envelope.interface_id, &device, write_timeout, envelope.job) => r,
                };
                if let Err(ref e) = result {
                    warn!(device = %device, error = %e, "device write failed");
                }
                let _ = envelope.response_tx.send(result);
            }
        }
    }
    debug!(device = %device, "device write worker exiting");
}

async fn execute(
    transport: &dyn Transport,
    interface_id: &InterfaceId,
    device: &DeviceAddress,
    write_timeout: Duration,
    job: WriteJob,
) -> Result<(), CoreError> {
    debug!(device = %device, round_trips = job.round_trips(), "executing write");
    match job {
        WriteJob::Parameter {
            channel,
            parameter,
            value,
        } => {
            with_timeout(
                write_timeout,
                transport.write_parameter(interface_id, device, channel, &parameter, &value),
            )
            .await
        }
        WriteJob::Schedule {
            channel,
            profile,
            batches,
        } => {
            for (weekday, paramset) in batches {
                debug!(device = %device, %profile, %weekday, fields = paramset.len(), "writing schedule");
                with_timeout(
                    write_timeout,
                    transport.put_paramset(interface_id, device, channel, &paramset),
                )
                .await?;
            }
            Ok(())
        }
    }
}

async fn with_timeout(
    deadline: Duration,
    call: impl Future<Output = Result<(), hubsync_api::Error>>,
) -> Result<(), CoreError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result.map_err(CoreError::from),
        Err(_) => Err(CoreError::Transport(hubsync_api::Error::Timeout {
            timeout_ms: u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
        })),
    }
}
