//! Bounded FIFO queue decoupling notify callers from the single-flight
//! sender.
//!
//! The channel is the mutual-exclusion primitive: many producers admit jobs
//! through `try_send`, one consumer task pops them in order. Admission
//! never blocks; only the caller's await on the completion handle does.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// One queued notification awaiting delivery.
pub(crate) struct NotificationJob {
    pub payload: String,
    pub enqueued_at: DateTime<Utc>,
    /// Resolved with the terminal delivery outcome; either outcome removes
    /// the job permanently.
    pub done: oneshot::Sender<Result<()>>,
}

/// Admission-controlled producer half of the queue.
#[derive(Clone)]
pub struct NotificationQueue {
    tx: mpsc::Sender<NotificationJob>,
}

impl NotificationQueue {
    pub(crate) fn bounded(max_depth: usize) -> (Self, mpsc::Receiver<NotificationJob>) {
        let (tx, rx) = mpsc::channel(max_depth);
        (Self { tx }, rx)
    }

    /// Admit a payload, returning the completion handle the caller awaits.
    /// Fails fast with `QueueFull` at capacity.
    pub fn enqueue(&self, payload: String) -> Result<oneshot::Receiver<Result<()>>> {
        let (done, completion) = oneshot::channel();
        let job = NotificationJob {
            payload,
            enqueued_at: Utc::now(),
            done,
        };
        match self.tx.try_send(job) {
            Ok(()) => Ok(completion),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::Other("notification worker stopped".to_string()))
            }
        }
    }

    /// Jobs currently queued.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
