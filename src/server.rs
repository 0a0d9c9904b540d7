use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::{net::SocketAddr, sync::Arc};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{
    agent::TelemetryAgent,
    capture::telemetry_middleware,
    handlers::{demo, metrics_handler},
    metrics,
    signals::setup_signal_handlers,
};

/// Catalogue database backing the demo routes
pub const DEMO_DATABASE_URL: &str = "sqlite::memory:";

const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Start the demo host with the telemetry agent attached
///
/// This function:
/// 1. Initializes metrics
/// 2. Sets up signal handlers for graceful shutdown
/// 3. Creates the Axum application with the capture middleware
/// 4. Serves requests until a shutdown signal arrives
/// 5. Drains the delivery queue within the configured grace period
pub async fn start_server(agent: TelemetryAgent) -> Result<()> {
    info!("Initializing Prometheus metrics...");
    let metrics_handle = Arc::new(metrics::init_metrics()?);

    let (shutdown_tx, signal_handle) = setup_signal_handlers();
    let mut shutdown_rx = shutdown_tx.subscribe();

    let demo_state = demo::DemoState::connect(agent.clone(), DEMO_DATABASE_URL).await?;
    let app = create_router(agent.clone(), demo_state, metrics_handle);

    let config = agent.config();
    let addr = SocketAddr::from((
        config.server.host.parse::<std::net::IpAddr>()?,
        config.server.port,
    ));

    info!("Starting telemetry demo host on {}", addr);
    info!(
        collector = %config.collector.url(),
        capacity = config.queue.capacity,
        ordered = config.queue.ordered,
        "Telemetry agent ready"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutdown signal received, draining connections...");
    })
    .await?;

    signal_handle.abort();

    info!("Draining telemetry queue...");
    if let Some(stats) = agent.shutdown().await {
        info!(
            processed = stats.processed,
            succeeded = stats.succeeded,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "Telemetry worker stopped"
        );
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Build the Axum router
///
/// Application routes run behind the capture middleware; `/health` and
/// `/metrics` are not captured.
pub fn create_router(
    agent: TelemetryAgent,
    demo_state: demo::DemoState,
    metrics_handle: Arc<PrometheusHandle>,
) -> Router {
    let captured_routes = Router::new()
        .route("/echo", post(demo::echo))
        .route("/items", get(demo::list_items))
        .route("/items/:id", get(demo::get_item))
        .route("/fail", get(demo::fail))
        .route("/moved", get(demo::moved))
        .route("/teapot", get(demo::teapot))
        .with_state(demo_state)
        .layer(middleware::from_fn_with_state(agent, telemetry_middleware));

    Router::new()
        .route("/health", get(demo::health))
        .route("/metrics", get(metrics_handler::metrics))
        .with_state(metrics_handle)
        .merge(captured_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
}
