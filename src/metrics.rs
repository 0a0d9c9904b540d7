use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder used by the host's `/metrics` route
pub fn init_metrics() -> anyhow::Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;

    init_metric_descriptions();

    Ok(handle)
}

/// Describe all agent metrics (safe to call more than once)
pub fn init_metric_descriptions() {
    describe_counter!(
        "telemetry_snapshots_enqueued_total",
        "Snapshots accepted by the delivery queue"
    );
    describe_counter!(
        "telemetry_snapshots_dropped_total",
        "Snapshots dropped before delivery"
    );
    describe_counter!(
        "telemetry_deliveries_total",
        "Delivery attempts by outcome"
    );
    describe_histogram!(
        "telemetry_delivery_duration_seconds",
        "Time spent posting one payload to the collector"
    );
    describe_gauge!(
        "telemetry_agent_info",
        "Agent version information"
    );

    gauge!("telemetry_agent_info", "version" => env!("CARGO_PKG_VERSION")).set(1.0);
}

pub fn record_enqueued() {
    counter!("telemetry_snapshots_enqueued_total").increment(1);
}

/// Record `count` dropped snapshots (`full`, `timeout`, `completed`, `shutdown`)
pub fn record_dropped(reason: &'static str, count: u64) {
    counter!("telemetry_snapshots_dropped_total", "reason" => reason).increment(count);
}

/// Record one delivery attempt
pub fn record_delivery(outcome: &'static str, duration: Duration) {
    counter!("telemetry_deliveries_total", "outcome" => outcome).increment(1);
    histogram!("telemetry_delivery_duration_seconds", "outcome" => outcome)
        .record(duration.as_secs_f64());
}
