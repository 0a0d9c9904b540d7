//! Agent facade
//!
//! `TelemetryAgent` owns everything the capture → redact → deliver pipeline
//! needs: the masker, the snapshot factory, the delivery queue and its
//! worker, the log capture registry and the query interceptors. It is cheap
//! to clone and is used as the state of the capture middleware.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::capture::SnapshotCapture;
use crate::config::AgentConfig;
use crate::delivery::{
    BackgroundWorker, DeliveryClient, DeliveryQueue, LogContextBuilder, PayloadPipeline,
    SnapshotSink, WorkerHandle, WorkerOptions, WorkerStats,
};
use crate::error::{AgentError, EnqueueError};
use crate::interceptor::{
    CommandEvents, CommandInterceptor, ConnectionInfo, CountingConnection, QueryInterceptor,
};
use crate::masking::SensitiveDataMasker;
use crate::models::Snapshot;
use crate::observability::{LogCaptureLayer, LogCaptureRegistry};

#[derive(Clone)]
pub struct TelemetryAgent {
    inner: Arc<AgentInner>,
}

struct AgentInner {
    config: AgentConfig,
    masker: Arc<SensitiveDataMasker>,
    capture: SnapshotCapture,
    queue: DeliveryQueue,
    log_registry: LogCaptureRegistry,
    command_events: CommandEvents,
    connection_interceptor: QueryInterceptor,
    worker: Mutex<Option<WorkerHandle>>,
}

impl TelemetryAgent {
    /// Start the agent with the collector delivery pipeline
    ///
    /// Must be called inside a tokio runtime; the delivery worker is spawned
    /// immediately.
    pub fn start(config: AgentConfig) -> Result<Self, AgentError> {
        let masker = Arc::new(SensitiveDataMasker::new(&config.masking)?);
        let builder =
            LogContextBuilder::new(masker.clone(), config.capture.features, &config.collector);
        let client = DeliveryClient::new(&config.collector)?;

        tracing::info!(
            collector = %client.url(),
            capacity = config.queue.capacity,
            ordered = config.queue.ordered,
            "Starting telemetry agent"
        );

        Self::assemble(
            config,
            masker,
            Arc::new(PayloadPipeline::new(builder, client)),
        )
    }

    /// Start the agent delivering to a custom sink
    pub fn with_sink(config: AgentConfig, sink: Arc<dyn SnapshotSink>) -> Result<Self, AgentError> {
        let masker = Arc::new(SensitiveDataMasker::new(&config.masking)?);
        Self::assemble(config, masker, sink)
    }

    fn assemble(
        config: AgentConfig,
        masker: Arc<SensitiveDataMasker>,
        sink: Arc<dyn SnapshotSink>,
    ) -> Result<Self, AgentError> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(AgentError::Runtime(
                "the telemetry agent must be started inside a tokio runtime".to_string(),
            ));
        }

        let (queue, receiver) = DeliveryQueue::new(&config.queue);
        let worker = BackgroundWorker::spawn(receiver, sink, WorkerOptions::from(&config.queue));

        let mut command_events = CommandEvents::new();
        command_events.register(Arc::new(CommandInterceptor::new(QueryInterceptor::new(
            &config.database.command,
        ))));

        Ok(Self {
            inner: Arc::new(AgentInner {
                capture: SnapshotCapture::new(&config.capture),
                log_registry: LogCaptureRegistry::new(config.capture.features.logs),
                connection_interceptor: QueryInterceptor::new(&config.database.connection),
                command_events,
                masker,
                queue,
                worker: Mutex::new(Some(worker)),
                config,
            }),
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.inner.config
    }

    pub fn masker(&self) -> &Arc<SensitiveDataMasker> {
        &self.inner.masker
    }

    pub fn snapshot_capture(&self) -> &SnapshotCapture {
        &self.inner.capture
    }

    pub fn queue(&self) -> &DeliveryQueue {
        &self.inner.queue
    }

    pub fn log_registry(&self) -> &LogCaptureRegistry {
        &self.inner.log_registry
    }

    /// Tracing layer routing request-scoped events into snapshots
    pub fn log_capture_layer(&self) -> LogCaptureLayer {
        LogCaptureLayer::new(self.inner.log_registry.clone())
    }

    /// Listener registry for ORM command events
    pub fn command_events(&self) -> &CommandEvents {
        &self.inner.command_events
    }

    /// Wrap a connection or pool so queries through it are counted and captured
    pub fn count_connection<C>(&self, inner: C, info: ConnectionInfo) -> CountingConnection<C> {
        CountingConnection::new(inner, info, self.inner.connection_interceptor.clone())
    }

    /// Hand a snapshot to the delivery worker; dropped with a warning when the
    /// queue stays full past the enqueue timeout
    pub async fn enqueue(&self, snapshot: Snapshot) {
        let correlation_id = snapshot.correlation_id.clone();
        match self.inner.queue.enqueue(snapshot).await {
            Ok(()) => {}
            Err(EnqueueError::Completed) => {
                tracing::debug!(correlation_id = %correlation_id, "Agent shutting down, snapshot dropped");
            }
            Err(e) => {
                tracing::warn!(correlation_id = %correlation_id, error = %e, "Snapshot dropped");
            }
        }
    }

    /// Complete the queue and give the worker the configured grace period
    pub async fn shutdown(&self) -> Option<WorkerStats> {
        let grace = Duration::from_millis(self.inner.config.queue.shutdown_grace_ms);
        self.shutdown_with_grace(grace).await
    }

    /// Returns `None` if the agent was already shut down
    pub async fn shutdown_with_grace(&self, grace: Duration) -> Option<WorkerStats> {
        self.inner.queue.complete();

        let worker = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()?;
        Some(worker.shutdown(grace).await)
    }
}
