//! Snapshot hand-off between request tasks and the delivery worker
//!
//! Many producers, one consumer. Bounded queues apply timed back-pressure:
//! a producer waits up to the enqueue timeout for space and then drops the
//! snapshot. `complete()` closes the queue for producers while the consumer
//! keeps draining what is already queued.

use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::config::QueueConfig;
use crate::error::EnqueueError;
use crate::models::Snapshot;

enum QueueSender {
    Bounded(mpsc::Sender<Snapshot>),
    Unbounded(mpsc::UnboundedSender<Snapshot>),
}

/// Producer side, cheap to clone
#[derive(Clone)]
pub struct DeliveryQueue {
    sender: Arc<ArcSwapOption<QueueSender>>,
    enqueue_timeout: Duration,
}

/// Consumer side, owned by the worker
pub enum QueueReceiver {
    Bounded(mpsc::Receiver<Snapshot>),
    Unbounded(mpsc::UnboundedReceiver<Snapshot>),
}

impl DeliveryQueue {
    /// Create a queue; a capacity of 0 means unbounded
    pub fn new(config: &QueueConfig) -> (Self, QueueReceiver) {
        let (sender, receiver) = if config.capacity == 0 {
            let (tx, rx) = mpsc::unbounded_channel();
            (QueueSender::Unbounded(tx), QueueReceiver::Unbounded(rx))
        } else {
            let (tx, rx) = mpsc::channel(config.capacity);
            (QueueSender::Bounded(tx), QueueReceiver::Bounded(rx))
        };

        let queue = Self {
            sender: Arc::new(ArcSwapOption::from_pointee(sender)),
            enqueue_timeout: Duration::from_millis(config.enqueue_timeout_ms),
        };
        (queue, receiver)
    }

    /// Enqueue without waiting
    pub fn try_enqueue(&self, snapshot: Snapshot) -> Result<(), EnqueueError> {
        let sender = self.sender.load_full().ok_or(EnqueueError::Completed)?;
        let result = match &*sender {
            QueueSender::Bounded(tx) => tx.try_send(snapshot).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EnqueueError::Full,
                mpsc::error::TrySendError::Closed(_) => EnqueueError::Completed,
            }),
            QueueSender::Unbounded(tx) => tx.send(snapshot).map_err(|_| EnqueueError::Completed),
        };
        record(result)
    }

    /// Enqueue, waiting at most the configured timeout when the queue is full
    pub async fn enqueue(&self, snapshot: Snapshot) -> Result<(), EnqueueError> {
        let sender = self.sender.load_full().ok_or(EnqueueError::Completed)?;
        let result = match &*sender {
            QueueSender::Bounded(tx) => match tx.try_send(snapshot) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Closed(_)) => Err(EnqueueError::Completed),
                Err(mpsc::error::TrySendError::Full(_)) if self.enqueue_timeout.is_zero() => {
                    Err(EnqueueError::Full)
                }
                Err(mpsc::error::TrySendError::Full(snapshot)) => tx
                    .send_timeout(snapshot, self.enqueue_timeout)
                    .await
                    .map_err(|e| match e {
                        mpsc::error::SendTimeoutError::Timeout(_) => EnqueueError::Timeout,
                        mpsc::error::SendTimeoutError::Closed(_) => EnqueueError::Completed,
                    }),
            },
            QueueSender::Unbounded(tx) => tx.send(snapshot).map_err(|_| EnqueueError::Completed),
        };
        record(result)
    }

    /// Stop accepting snapshots; queued ones are still delivered
    pub fn complete(&self) {
        if self.sender.swap(None).is_some() {
            tracing::debug!("Delivery queue completed");
        }
    }

    pub fn is_completed(&self) -> bool {
        self.sender.load().is_none()
    }
}

fn record(result: Result<(), EnqueueError>) -> Result<(), EnqueueError> {
    match &result {
        Ok(()) => crate::metrics::record_enqueued(),
        Err(e) => crate::metrics::record_dropped(e.reason(), 1),
    }
    result
}

impl QueueReceiver {
    /// Next snapshot, `None` once the queue is completed and drained
    pub async fn recv(&mut self) -> Option<Snapshot> {
        match self {
            Self::Bounded(rx) => rx.recv().await,
            Self::Unbounded(rx) => rx.recv().await,
        }
    }

    /// Next snapshot if one is ready right now
    pub fn try_recv(&mut self) -> Option<Snapshot> {
        match self {
            Self::Bounded(rx) => rx.try_recv().ok(),
            Self::Unbounded(rx) => rx.try_recv().ok(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Bounded(rx) => rx.len(),
            Self::Unbounded(rx) => rx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
