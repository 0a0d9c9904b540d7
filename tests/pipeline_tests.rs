/// End-to-end tests: demo router → capture middleware → queue → worker → collector
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use telemetry_agent::{
    config::AgentConfig,
    handlers::demo::DemoState,
    server::{create_router, DEMO_DATABASE_URL},
    TelemetryAgent,
};
use tower::ServiceExt;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn config_for(collector: &MockServer) -> AgentConfig {
    let mut cfg = AgentConfig::default();
    cfg.collector.base_url = collector.uri();
    cfg.collector.application_name = "shop".to_string();
    cfg.collector.account_code = Some("ACME".to_string());
    cfg
}

async fn app(agent: &TelemetryAgent) -> Router {
    let demo = DemoState::connect(agent.clone(), DEMO_DATABASE_URL)
        .await
        .unwrap();
    let handle = PrometheusBuilder::new().build_recorder().handle();
    create_router(agent.clone(), demo, Arc::new(handle))
}

#[tokio::test]
async fn test_echo_is_captured_masked_and_delivered() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/log-context"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(&collector)
        .await;

    let agent = TelemetryAgent::start(config_for(&collector)).unwrap();
    let app = app(&agent).await;

    let body = json!({ "user": "ana", "Password": "hunter2" }).to_string();
    let request = Request::builder()
        .method("POST")
        .uri("/echo?page=2")
        .header("content-type", "application/json")
        .header("authorization", "Bearer abc.def")
        .header("x-correlation-id", "corr-echo")
        .header("x-client-id", "mobile")
        .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
        .header("user-agent", "pipeline-test/1.0")
        .body(Body::from(body.clone()))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The application sees the original, unmasked body
    let echoed = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(echoed, body.as_bytes());

    let stats = agent.shutdown().await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.panicked, 0);

    let received = collector.received_requests().await.unwrap();
    assert_eq!(received.len(), 1);
    let delivered = &received[0];

    let header = |name: &str| {
        delivered
            .headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    assert_eq!(header("x-correlation-id").as_deref(), Some("corr-echo"));
    assert_eq!(header("x-client-id").as_deref(), Some("mobile,shop"));
    assert_eq!(header("x-forwarded-for").as_deref(), Some("203.0.113.9"));
    assert_eq!(header("user-agent").as_deref(), Some("pipeline-test/1.0"));
    assert_eq!(header("x-account-code").as_deref(), Some("ACME"));
    assert!(header("x-pod-name").is_some());

    let payload: Value = serde_json::from_slice(&delivered.body).unwrap();
    assert_eq!(payload["correlationId"], "corr-echo");
    assert_eq!(payload["applicationName"], "shop");
    assert_eq!(payload["request"]["method"], "POST");
    assert_eq!(payload["request"]["path"], "/echo");
    assert_eq!(payload["request"]["queryString"], "page=2");
    assert_eq!(payload["request"]["headers"]["authorization"], "***");
    assert_eq!(payload["request"]["body"]["user"], "ana");
    assert_eq!(payload["request"]["body"]["Password"], "***");
    assert_eq!(payload["response"]["statusCode"], 200);
    assert_eq!(payload["response"]["body"]["Password"], "***");
    assert_eq!(payload["response"]["size"], body.len() as u64);
    assert_eq!(payload["errorCategory"], "None");
}

#[tokio::test]
async fn test_collector_rejection_does_not_reach_the_application() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "correlationId": "c-1",
            "issues": [{ "type": "Validation", "descriptionType": "MissingField" }]
        })))
        .expect(2)
        .mount(&collector)
        .await;

    let agent = TelemetryAgent::start(config_for(&collector)).unwrap();
    let app = app(&agent).await;

    for uri in ["/fail", "/items/1"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let expected = if uri == "/fail" {
            StatusCode::INTERNAL_SERVER_ERROR
        } else {
            StatusCode::OK
        };
        assert_eq!(response.status(), expected);
    }

    let stats = agent.shutdown().await.unwrap();
    assert_eq!(stats.processed, 2);
    assert_eq!(stats.panicked, 0);

    let received = collector.received_requests().await.unwrap();
    let failed: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(failed["errorCategory"], "Exception");
    assert_eq!(failed["attentionLevel"], "Error");
    assert_eq!(failed["response"]["resolvedStatusCode"], 500);
}

#[tokio::test]
async fn test_unreachable_collector_is_tolerated() {
    let mut cfg = AgentConfig::default();
    // Nothing listens on the discard port
    cfg.collector.base_url = "http://127.0.0.1:9".to_string();
    cfg.collector.timeout_seconds = 1;

    let agent = TelemetryAgent::start(cfg).unwrap();
    let app = app(&agent).await;

    let response = app
        .oneshot(Request::builder().uri("/items/2").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let stats = agent.shutdown().await.unwrap();
    assert_eq!(stats.processed, 1);
    assert_eq!(stats.panicked, 0);
}

#[tokio::test]
async fn test_health_and_metrics_are_not_captured() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&collector)
        .await;

    let agent = TelemetryAgent::start(config_for(&collector)).unwrap();
    let app = app(&agent).await;

    for uri in ["/health", "/metrics"] {
        let response = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let stats = agent.shutdown().await.unwrap();
    assert_eq!(stats.processed, 0);
}
