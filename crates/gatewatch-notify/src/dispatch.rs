//! Ordered, non-blocking hand-off from the detection loop to a transport.
//!
//! Producers push [`NotificationJob`]s through a cloneable [`DispatchHandle`];
//! a single consumer task delivers them one at a time in submission order.
//! Transport failures and timeouts are logged and counted, never retried.

use crate::transport::{Transport, TransportError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// One outbound notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationJob {
    pub message: String,
    /// JPEG snapshot to attach.
    pub image: Option<Vec<u8>>,
}

impl NotificationJob {
    pub fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            image: None,
        }
    }

    pub fn with_image(message: impl Into<String>, image: Option<Vec<u8>>) -> Self {
        Self {
            message: message.into(),
            image,
        }
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("dispatch queue is closed")]
    Closed,
}

enum Envelope {
    Job(NotificationJob),
    Shutdown,
}

/// Producer side of the queue. Cheap to clone.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl DispatchHandle {
    /// Enqueue a job. Never waits on the transport.
    pub fn submit(&self, job: NotificationJob) -> Result<(), DispatchError> {
        self.tx
            .send(Envelope::Job(job))
            .map_err(|_| DispatchError::Closed)
    }
}

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

/// Live counters, readable even if the consumer is abandoned mid-send.
#[derive(Default)]
struct Counters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl Counters {
    fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Owns the consumer task.
pub struct Dispatcher {
    handle: DispatchHandle,
    counters: Arc<Counters>,
    task: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the consumer on the current tokio runtime. Each delivery is cut
    /// off after `send_timeout`.
    pub fn spawn(transport: Arc<dyn Transport>, send_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let counters = Arc::new(Counters::default());
        let task = tokio::spawn(consume(rx, transport, send_timeout, Arc::clone(&counters)));
        Self {
            handle: DispatchHandle { tx },
            counters,
            task,
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Deliveries and failures so far.
    pub fn stats(&self) -> DispatchStats {
        self.counters.stats()
    }

    /// Stop accepting jobs, deliver everything already queued, and wait up to
    /// `grace` for the consumer to finish. The returned counts cover whatever
    /// was delivered before the consumer finished or was abandoned.
    pub async fn shutdown(self, grace: Duration) -> DispatchStats {
        // Fails only if the consumer is already gone.
        let _ = self.handle.tx.send(Envelope::Shutdown);
        drop(self.handle);

        let mut task = self.task;
        match tokio::time::timeout(grace, &mut task).await {
            Ok(Ok(())) => tracing::debug!("dispatch queue drained"),
            Ok(Err(e)) => tracing::error!(error = %e, "dispatch consumer panicked"),
            Err(_) => {
                tracing::warn!(?grace, "dispatch queue not drained within grace period; abandoning");
                task.abort();
            }
        }
        self.counters.stats()
    }
}

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    transport: Arc<dyn Transport>,
    send_timeout: Duration,
    counters: Arc<Counters>,
) {
    tracing::debug!("dispatch consumer started");

    while let Some(envelope) = rx.recv().await {
        match envelope {
            Envelope::Job(job) => match deliver(transport.as_ref(), &job, send_timeout).await {
                Ok(()) => {
                    counters.delivered.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(message = %job.message, "notification delivered");
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(message = %job.message, error = %e, "notification failed");
                }
            },
            Envelope::Shutdown => {
                // Reject new submissions; keep draining what is already queued.
                rx.close();
            }
        }
    }

    tracing::debug!("dispatch consumer exiting");
}

async fn deliver(
    transport: &dyn Transport,
    job: &NotificationJob,
    send_timeout: Duration,
) -> Result<(), TransportError> {
    tokio::time::timeout(send_timeout, transport.send(&job.message, job.image.as_deref()))
        .await
        .map_err(|_| TransportError::Timeout(send_timeout))?
}
