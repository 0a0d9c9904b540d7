//! Background delivery worker
//!
//! A single long-running task owns the queue receiver. Each snapshot is handed
//! to a [`SnapshotSink`]; an error or panic while processing one item is
//! logged and the loop moves on. On shutdown the worker stops waiting for new
//! work, drains what is already queued until the deadline, then exits.

use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use super::queue::QueueReceiver;
use crate::config::QueueConfig;
use crate::error::AgentError;
use crate::models::Snapshot;

/// Extra time granted to the task to unwind after the drain deadline
const JOIN_MARGIN: Duration = Duration::from_millis(250);

#[async_trait]
pub trait SnapshotSink: Send + Sync + 'static {
    async fn process(&self, snapshot: Snapshot) -> Result<(), AgentError>;
}

#[derive(Debug, Clone, Copy)]
pub struct WorkerOptions {
    /// One item at a time in queue order; false processes items concurrently
    pub ordered: bool,
    /// Upper bound on concurrent deliveries when unordered
    pub max_in_flight: usize,
}

impl WorkerOptions {
    pub fn ordered() -> Self {
        Self {
            ordered: true,
            max_in_flight: 1,
        }
    }

    pub fn unordered(max_in_flight: usize) -> Self {
        Self {
            ordered: false,
            max_in_flight: max_in_flight.max(1),
        }
    }
}

impl From<&QueueConfig> for WorkerOptions {
    fn from(config: &QueueConfig) -> Self {
        if config.ordered {
            Self::ordered()
        } else {
            Self::unordered(config.max_in_flight)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    /// Queued when the drain deadline passed
    pub abandoned: u64,
}

#[derive(Default)]
struct StatsCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    abandoned: AtomicU64,
}

impl StatsCounters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

pub struct WorkerHandle {
    shutdown: watch::Sender<Option<Instant>>,
    join: JoinHandle<()>,
    stats: Arc<StatsCounters>,
}

impl WorkerHandle {
    pub fn stats(&self) -> WorkerStats {
        self.stats.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the worker to exit on its own (queue completed and drained)
    pub async fn join(self) -> WorkerStats {
        if let Err(e) = self.join.await {
            tracing::error!(error = %e, "Delivery worker task failed");
        }
        self.stats.snapshot()
    }

    /// Stop the worker, letting it drain queued items for at most `grace`
    pub async fn shutdown(mut self, grace: Duration) -> WorkerStats {
        let deadline = Instant::now() + grace;
        let _ = self.shutdown.send(Some(deadline));

        match tokio::time::timeout_at(deadline + JOIN_MARGIN, &mut self.join).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Delivery worker task failed"),
            Err(_) => {
                tracing::warn!(
                    grace_ms = grace.as_millis() as u64,
                    "Delivery worker did not stop within the grace period, aborting"
                );
                self.join.abort();
            }
        }

        let stats = self.stats.snapshot();
        tracing::info!(
            processed = stats.processed,
            failed = stats.failed + stats.panicked,
            abandoned = stats.abandoned,
            "Delivery worker stopped"
        );
        stats
    }
}

pub struct BackgroundWorker {
    receiver: QueueReceiver,
    sink: Arc<dyn SnapshotSink>,
    options: WorkerOptions,
    stats: Arc<StatsCounters>,
    shutdown: watch::Receiver<Option<Instant>>,
    in_flight: JoinSet<()>,
}

impl BackgroundWorker {
    pub fn spawn(
        receiver: QueueReceiver,
        sink: Arc<dyn SnapshotSink>,
        options: WorkerOptions,
    ) -> WorkerHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        let stats = Arc::new(StatsCounters::default());

        let worker = Self {
            receiver,
            sink,
            options,
            stats: stats.clone(),
            shutdown: shutdown_rx,
            in_flight: JoinSet::new(),
        };

        let join = tokio::spawn(async move {
            let result = AssertUnwindSafe(worker.run()).catch_unwind().await;
            if let Err(e) = result {
                tracing::error!(panic = ?e, "Delivery worker loop panicked");
            }
        });

        WorkerHandle {
            shutdown: shutdown_tx,
            join,
            stats,
        }
    }

    async fn run(mut self) {
        tracing::debug!(
            ordered = self.options.ordered,
            max_in_flight = self.options.max_in_flight,
            "Delivery worker started"
        );

        loop {
            tokio::select! {
                biased;

                changed = self.shutdown.changed() => {
                    let deadline = match changed {
                        Ok(()) => *self.shutdown.borrow_and_update(),
                        // handle dropped without a deadline: drain without limit
                        Err(_) => None,
                    };
                    self.drain(deadline).await;
                    return;
                }

                Some(result) = self.in_flight.join_next(), if !self.in_flight.is_empty() => {
                    self.record_task(result);
                }

                // leave items queued while every delivery slot is busy
                item = self.receiver.recv(), if self.has_free_slot() => match item {
                    Some(snapshot) => self.dispatch(snapshot).await,
                    None => {
                        self.drain_in_flight(None).await;
                        tracing::debug!("Delivery queue drained, worker exiting");
                        return;
                    }
                },
            }
        }
    }

    async fn dispatch(&mut self, snapshot: Snapshot) {
        if self.options.ordered {
            self.stats.processed.fetch_add(1, Ordering::Relaxed);
            let outcome = process_one(self.sink.clone(), snapshot).await;
            self.record(outcome);
        } else {
            while !self.has_free_slot() {
                match self.in_flight.join_next().await {
                    Some(result) => self.record_task(result),
                    None => break,
                }
            }
            self.stats.processed.fetch_add(1, Ordering::Relaxed);
            let sink = self.sink.clone();
            let stats = self.stats.clone();
            self.in_flight.spawn(async move {
                let outcome = process_one(sink, snapshot).await;
                record_outcome(&stats, outcome);
            });
        }
    }

    fn has_free_slot(&self) -> bool {
        self.in_flight.len() < self.options.max_in_flight
    }

    async fn drain(&mut self, deadline: Option<Instant>) {
        tracing::debug!(queued = self.receiver.len(), "Draining delivery queue");

        loop {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, self.receiver.recv()).await {
                    Ok(next) => next,
                    Err(_) => break,
                },
                None => self.receiver.try_recv(),
            };
            let Some(snapshot) = next else { break };

            match deadline {
                Some(deadline) => {
                    let correlation_id = snapshot.correlation_id.clone();
                    if tokio::time::timeout_at(deadline, self.dispatch(snapshot))
                        .await
                        .is_err()
                    {
                        tracing::warn!(
                            correlation_id = %correlation_id,
                            "Drain deadline reached while delivering"
                        );
                        self.stats.abandoned.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                }
                None => self.dispatch(snapshot).await,
            }
        }

        self.drain_in_flight(deadline).await;

        let abandoned = self.receiver.len() as u64;
        if abandoned > 0 {
            self.stats.abandoned.fetch_add(abandoned, Ordering::Relaxed);
            crate::metrics::record_dropped("shutdown", abandoned);
            tracing::warn!(abandoned, "Delivery queue not fully drained before shutdown");
        }
    }

    async fn drain_in_flight(&mut self, deadline: Option<Instant>) {
        while !self.in_flight.is_empty() {
            let next = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline, self.in_flight.join_next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            let pending = self.in_flight.len() as u64;
                            self.stats.abandoned.fetch_add(pending, Ordering::Relaxed);
                            self.in_flight.abort_all();
                            return;
                        }
                    }
                }
                None => self.in_flight.join_next().await,
            };
            match next {
                Some(result) => self.record_task(result),
                None => return,
            }
        }
    }

    fn record(&self, outcome: Outcome) {
        record_outcome(&self.stats, outcome);
    }

    fn record_task(&self, result: Result<(), tokio::task::JoinError>) {
        if let Err(e) = result {
            if e.is_panic() {
                self.stats.panicked.fetch_add(1, Ordering::Relaxed);
            }
            tracing::error!(error = %e, "Delivery task failed");
        }
    }
}

enum Outcome {
    Succeeded,
    Failed,
    Panicked,
}

async fn process_one(sink: Arc<dyn SnapshotSink>, snapshot: Snapshot) -> Outcome {
    let correlation_id = snapshot.correlation_id.clone();

    match AssertUnwindSafe(sink.process(snapshot)).catch_unwind().await {
        Ok(Ok(())) => Outcome::Succeeded,
        Ok(Err(e)) => {
            tracing::error!(correlation_id = %correlation_id, error = %e, "Failed to process snapshot");
            Outcome::Failed
        }
        Err(panic) => {
            tracing::error!(correlation_id = %correlation_id, panic = ?panic, "Snapshot processing panicked");
            Outcome::Panicked
        }
    }
}

fn record_outcome(stats: &StatsCounters, outcome: Outcome) {
    let counter = match outcome {
        Outcome::Succeeded => &stats.succeeded,
        Outcome::Failed => &stats.failed,
        Outcome::Panicked => &stats.panicked,
    };
    counter.fetch_add(1, Ordering::Relaxed);
}
