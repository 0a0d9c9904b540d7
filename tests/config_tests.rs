/// Configuration loading from files and the environment
use std::io::Write;
use telemetry_agent::{config::load_config, models::CaptureOption};
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_full_file() {
    let file = write_config(
        r#"
        [server]
        port = 9090
        log_format = "json"

        [collector]
        base_url = "https://collector.internal"
        endpoint = "v2/ingest"
        application_name = "billing"
        account_code = "ACME"

        [masking]
        mask_value = "[redacted]"
        sensitive_keys = ["ssn"]
        patterns = []

        [capture]
        max_response_body_mb = 4
        capture_cookies = false

        [capture.features]
        logs = false

        [database.connection]
        capture = ["Query", "Parameters"]

        [queue]
        capacity = 0
        ordered = false
        max_in_flight = 3
        "#,
    );

    let cfg = load_config(Some(file.path())).unwrap();

    assert_eq!(cfg.server.port, 9090);
    assert_eq!(cfg.server.log_format, "json");
    assert_eq!(cfg.collector.url(), "https://collector.internal/v2/ingest");
    assert_eq!(cfg.collector.application_name, "billing");
    assert_eq!(cfg.collector.account_code.as_deref(), Some("ACME"));
    assert_eq!(cfg.masking.mask_value, "[redacted]");
    assert_eq!(cfg.masking.sensitive_keys, vec!["ssn".to_string()]);
    assert!(cfg.masking.patterns.is_empty());
    assert_eq!(cfg.capture.max_response_body_mb, 4);
    assert!(!cfg.capture.capture_cookies);
    assert!(!cfg.capture.features.logs);
    assert!(cfg.capture.features.exceptions);
    assert!(cfg.database.connection.capture.contains(CaptureOption::Parameters));
    assert!(!cfg.database.connection.capture.contains(CaptureOption::Context));
    assert!(cfg.database.command.capture.contains(CaptureOption::Context));
    assert_eq!(cfg.queue.capacity, 0);
    assert!(!cfg.queue.ordered);
    assert_eq!(cfg.queue.max_in_flight, 3);
}

#[test]
fn test_invalid_values_rejected_on_load() {
    let file = write_config(
        r#"
        [collector]
        endpoint = "   "
        "#,
    );
    let err = load_config(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("endpoint"));

    let file = write_config(
        r#"
        [masking]
        patterns = ["[a-"]
        "#,
    );
    let err = load_config(Some(file.path())).unwrap_err();
    assert!(err.to_string().contains("Invalid masking pattern"));
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.toml");
    assert!(load_config(Some(&missing)).is_err());
}

#[test]
fn test_environment_overrides_file() {
    let file = write_config(
        r#"
        [queue]
        shutdown_grace_ms = 1000
        "#,
    );

    std::env::set_var("TELEMETRY_AGENT__QUEUE__SHUTDOWN_GRACE_MS", "250");
    let cfg = load_config(Some(file.path()));
    std::env::remove_var("TELEMETRY_AGENT__QUEUE__SHUTDOWN_GRACE_MS");

    assert_eq!(cfg.unwrap().queue.shutdown_grace_ms, 250);
}
