//! The outbound notification relay.
//!
//! Wires the admission queue, the single-flight delivery executor, and the
//! failure monitor behind one service object. Callers admit a payload and
//! await its completion handle; one consumer task drains the queue in FIFO
//! order, one send at a time, because the underlying session handle is not
//! safe for concurrent use and group message order should match submission
//! order.

pub mod delivery;
pub mod message;
pub mod monitor;
pub mod queue;

pub use delivery::{DeliveryConfig, DeliveryExecutor, is_transient};
pub use message::SessionNotification;
pub use monitor::{FailureMonitor, MonitorConfig};
pub use queue::NotificationQueue;

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::messaging::session::SessionManager;
use crate::notifier::queue::NotificationJob;

/// Tunables for the relay as a whole.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Maximum queued notifications before enqueue fails fast.
    pub queue_depth: usize,
    pub delivery: DeliveryConfig,
    pub monitor: MonitorConfig,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            queue_depth: 200,
            delivery: DeliveryConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// The notification relay service.
pub struct NotifierService {
    queue: NotificationQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel_token: CancellationToken,
}

impl NotifierService {
    /// Create the service and start its consumer loop.
    pub fn start(session: Arc<SessionManager>, config: NotifierConfig) -> Self {
        let monitor = Arc::new(FailureMonitor::new(Arc::clone(&session), config.monitor));
        let executor = DeliveryExecutor::new(session, monitor, config.delivery);
        let (queue, rx) = NotificationQueue::bounded(config.queue_depth);
        let cancel_token = CancellationToken::new();
        let worker = tokio::spawn(consume(rx, executor, cancel_token.clone()));
        Self {
            queue,
            worker: Mutex::new(Some(worker)),
            cancel_token,
        }
    }

    /// Admit a payload; the returned handle resolves with the terminal
    /// delivery outcome. Fails fast when the queue is at capacity.
    pub fn submit(&self, payload: String) -> Result<oneshot::Receiver<Result<()>>> {
        self.queue.enqueue(payload)
    }

    /// Admit a payload and wait for its terminal outcome.
    pub async fn deliver(&self, payload: String) -> Result<()> {
        let completion = self.queue.enqueue(payload)?;
        completion
            .await
            .map_err(|_| Error::Other("notification worker stopped".to_string()))?
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Stop the consumer loop. Jobs still queued are dropped; their callers
    /// see a worker-stopped error.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

/// Single consumer loop: strictly FIFO, one send in flight at a time. Parks
/// on the channel while the queue is empty.
async fn consume(
    mut rx: mpsc::Receiver<NotificationJob>,
    executor: DeliveryExecutor,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let queued_ms = Utc::now()
            .signed_duration_since(job.enqueued_at)
            .num_milliseconds();
        debug!(queued_ms, "processing notification");

        let result = executor.send(&job.payload).await;
        if let Err(err) = &result {
            warn!(error = %err, "notification delivery failed");
        }
        // The caller may have gone away; that is fine.
        let _ = job.done.send(result);
    }
    debug!("notification consumer stopped");
}
