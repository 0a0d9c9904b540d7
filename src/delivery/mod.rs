//! Asynchronous delivery of snapshots to the remote collector
//!
//! ```text
//! request task ──enqueue──▶ DeliveryQueue ──▶ BackgroundWorker
//!                                                 │
//!                                   LogContextBuilder (masking)
//!                                                 │
//!                                   DeliveryClient ──POST──▶ collector
//! ```

pub mod builder;
pub mod client;
pub mod queue;
pub mod worker;

use async_trait::async_trait;

pub use builder::LogContextBuilder;
pub use client::{DeliveryClient, FlushOutcome};
pub use queue::{DeliveryQueue, QueueReceiver};
pub use worker::{BackgroundWorker, SnapshotSink, WorkerHandle, WorkerOptions, WorkerStats};

use crate::error::AgentError;
use crate::models::Snapshot;

/// The default sink: build the masked payload and post it once
pub struct PayloadPipeline {
    builder: LogContextBuilder,
    client: DeliveryClient,
}

impl PayloadPipeline {
    pub fn new(builder: LogContextBuilder, client: DeliveryClient) -> Self {
        Self { builder, client }
    }
}

#[async_trait]
impl SnapshotSink for PayloadPipeline {
    async fn process(&self, snapshot: Snapshot) -> Result<(), AgentError> {
        let payload = self.builder.build(&snapshot);
        self.client.flush(&payload).await;
        Ok(())
    }
}
