use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::CaptureOptions;

/// Environment variable prefix, e.g. `TELEMETRY_AGENT__COLLECTOR__BASE_URL`
pub const ENV_PREFIX: &str = "TELEMETRY_AGENT";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub masking: MaskingConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub queue: QueueConfig,
}

/// Demo host settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Remote collector endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Appended to the client id header and reported in every payload
    #[serde(default = "default_application_name")]
    pub application_name: String,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub account_code: Option<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            endpoint: default_endpoint(),
            timeout_seconds: default_timeout_seconds(),
            application_name: default_application_name(),
            account_id: None,
            account_code: None,
        }
    }
}

impl CollectorConfig {
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }
}

/// Sensitive-data masking
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MaskingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_mask_value")]
    pub mask_value: String,
    /// Keys matched case-insensitively
    #[serde(default = "default_sensitive_keys")]
    pub sensitive_keys: Vec<String>,
    /// Regex patterns applied to non-JSON text
    #[serde(default = "default_mask_patterns")]
    pub patterns: Vec<String>,
}

impl Default for MaskingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mask_value: default_mask_value(),
            sensitive_keys: default_sensitive_keys(),
            patterns: default_mask_patterns(),
        }
    }
}

/// What the middleware records per request
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaptureConfig {
    /// Larger response bodies are replaced by a notice
    #[serde(default = "default_max_response_body_mb")]
    pub max_response_body_mb: u64,
    #[serde(default = "default_true")]
    pub capture_cookies: bool,
    #[serde(default)]
    pub features: FeatureFlags,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_response_body_mb: default_max_response_body_mb(),
            capture_cookies: true,
            features: FeatureFlags::default(),
        }
    }
}

impl CaptureConfig {
    pub fn max_response_body_bytes(&self) -> u64 {
        self.max_response_body_mb.saturating_mul(1024 * 1024)
    }
}

/// Per-feature switches for side-channel data
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct FeatureFlags {
    #[serde(default = "default_true")]
    pub exceptions: bool,
    #[serde(default = "default_true")]
    pub notifications: bool,
    #[serde(default = "default_true")]
    pub logs: bool,
    #[serde(default = "default_true")]
    pub http_requests: bool,
    #[serde(default = "default_true")]
    pub db_queries: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            exceptions: true,
            notifications: true,
            logs: true,
            http_requests: true,
            db_queries: true,
        }
    }
}

/// Query interceptor settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Event-driven interceptor fed by ORM command callbacks
    #[serde(default)]
    pub command: InterceptorConfig,
    /// Decorator wrapped around a connection
    #[serde(default)]
    pub connection: InterceptorConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InterceptorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub capture: CaptureOptions,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture: CaptureOptions::default(),
        }
    }
}

/// Delivery queue and worker
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Maximum queued snapshots; 0 means unbounded
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// How long a producer waits for space before dropping a snapshot
    #[serde(default = "default_enqueue_timeout_ms")]
    pub enqueue_timeout_ms: u64,
    /// Drain budget granted to the worker on shutdown
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    /// Deliver one at a time in enqueue order; false posts concurrently
    #[serde(default = "default_true")]
    pub ordered: bool,
    /// Concurrent deliveries allowed when `ordered` is false
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            enqueue_timeout_ms: default_enqueue_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
            ordered: true,
            max_in_flight: default_max_in_flight(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_base_url() -> String {
    "http://localhost:5080".to_string()
}

fn default_endpoint() -> String {
    "/api/log-context".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

fn default_application_name() -> String {
    env!("CARGO_PKG_NAME").to_string()
}

fn default_true() -> bool {
    true
}

fn default_mask_value() -> String {
    "***".to_string()
}

fn default_sensitive_keys() -> Vec<String> {
    [
        "password",
        "passwd",
        "secret",
        "token",
        "access_token",
        "refresh_token",
        "authorization",
        "cookie",
        "set-cookie",
        "x-api-key",
        "api_key",
        "apikey",
        "client_secret",
        "credit_card",
        "cardnumber",
        "cvv",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_mask_patterns() -> Vec<String> {
    vec![
        // Bearer credentials
        r"(?i)bearer\s+[a-z0-9\-._~+/]+=*".to_string(),
        // 13-19 digit card numbers, optionally grouped
        r"\b(?:\d[ -]?){12,18}\d\b".to_string(),
        // key=value secrets in query strings and free text
        r"(?i)(password|secret|token)=[^&\s]+".to_string(),
    ]
}

fn default_max_response_body_mb() -> u64 {
    1
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_enqueue_timeout_ms() -> u64 {
    50
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_max_in_flight() -> usize {
    8
}

/// Load configuration from a TOML file layered with `TELEMETRY_AGENT__*` env vars
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AgentConfig> {
    let file = match path {
        Some(path) => config::File::from(path.to_path_buf()).required(true),
        None => config::File::with_name("telemetry").required(false),
    };

    let config = config::Config::builder()
        .add_source(file)
        .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let cfg: AgentConfig = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &AgentConfig) -> anyhow::Result<()> {
    let base_url = url::Url::parse(&cfg.collector.base_url).map_err(|e| {
        anyhow::anyhow!("Invalid collector base_url '{}': {}", cfg.collector.base_url, e)
    })?;
    if !matches!(base_url.scheme(), "http" | "https") {
        anyhow::bail!(
            "Collector base_url must use http or https, got '{}'",
            base_url.scheme()
        );
    }

    if cfg.collector.endpoint.trim().is_empty() {
        anyhow::bail!("Collector endpoint cannot be empty");
    }

    if cfg.collector.timeout_seconds == 0 {
        anyhow::bail!("Collector timeout_seconds must be greater than 0");
    }

    if cfg.collector.application_name.trim().is_empty() {
        anyhow::bail!("Collector application_name cannot be empty");
    }

    for pattern in &cfg.masking.patterns {
        if let Err(e) = regex::Regex::new(pattern) {
            anyhow::bail!("Invalid masking pattern '{}': {}", pattern, e);
        }
    }

    if cfg.masking.enabled && cfg.masking.mask_value.is_empty() {
        anyhow::bail!("Masking mask_value cannot be empty when masking is enabled");
    }

    if cfg.queue.max_in_flight == 0 {
        anyhow::bail!("Queue max_in_flight must be greater than 0");
    }

    if !matches!(cfg.server.log_format.as_str(), "pretty" | "json") {
        anyhow::bail!(
            "Invalid log_format '{}', expected 'pretty' or 'json'",
            cfg.server.log_format
        );
    }

    Ok(())
}
