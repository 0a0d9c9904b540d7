use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use telemetry_agent::{config, init_tracing_with, server, TelemetryAgent};

/// Execute the start command
///
/// Tracing is initialized after the agent exists so the log capture layer
/// can be installed with the fmt layer.
pub async fn execute(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Starting telemetry agent demo host...".green());

    let cfg = config::load_config(config_path)?;
    let (log_format, log_level) = (cfg.server.log_format.clone(), cfg.server.log_level.clone());

    let agent = TelemetryAgent::start(cfg)?;
    init_tracing_with(&log_format, &log_level, Some(agent.log_capture_layer()));

    server::start_server(agent).await
}
