use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// GET /metrics - queue and delivery counters in Prometheus text format
pub async fn metrics(State(handle): State<Arc<PrometheusHandle>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
        handle.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    #[tokio::test]
    async fn test_metrics_handler_renders_local_recorder() {
        // Local recorder so the global one stays untouched
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            for _ in 0..3 {
                crate::metrics::record_enqueued();
            }
        });

        let response = metrics(State(Arc::new(handle))).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("telemetry_snapshots_enqueued_total 3"));
    }
}
