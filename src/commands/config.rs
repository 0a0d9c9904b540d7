use anyhow::Result;
use colored::Colorize;
use std::path::Path;
use telemetry_agent::config::{self, AgentConfig};
use tracing::info;

/// Execute the config show command
///
/// Displays the effective configuration with account identifiers masked
pub fn show(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());
    info!("Loading configuration for display");

    let cfg = config::load_config(config_path)?;
    let sanitized = sanitize_secrets(&cfg);

    println!("{}", "Current Configuration:".green().bold());
    println!();

    let toml_string = toml::to_string_pretty(&sanitized)?;
    println!("{}", toml_string);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: Option<&Path>) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());
    info!("Validating configuration file");

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    println!("  Collector: {}", cfg.collector.url());
    println!(
        "  Masking: {} ({} keys, {} patterns)",
        enabled_label(cfg.masking.enabled),
        cfg.masking.sensitive_keys.len(),
        cfg.masking.patterns.len()
    );
    println!(
        "  Query interceptors: command {}, connection {}",
        enabled_label(cfg.database.command.enabled),
        enabled_label(cfg.database.connection.enabled)
    );
    println!(
        "  Queue: {} ({})",
        queue_capacity_label(cfg.queue.capacity),
        if cfg.queue.ordered { "ordered" } else { "unordered" }
    );

    info!("Configuration validation successful");
    Ok(())
}

/// Mask collector account identifiers for display
fn sanitize_secrets(cfg: &AgentConfig) -> AgentConfig {
    let mut sanitized = cfg.clone();
    sanitized.collector.account_id = cfg.collector.account_id.as_deref().map(mask_identifier);
    sanitized.collector.account_code = cfg.collector.account_code.as_deref().map(mask_identifier);
    sanitized
}

/// Keep the last 4 characters: "acct-1234567" -> "***4567"
fn mask_identifier(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 4 {
        return "***".to_string();
    }
    let suffix: String = chars[chars.len() - 4..].iter().collect();
    format!("***{}", suffix)
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn queue_capacity_label(capacity: usize) -> String {
    if capacity == 0 {
        "unbounded".to_string()
    } else {
        format!("capacity {}", capacity)
    }
}
