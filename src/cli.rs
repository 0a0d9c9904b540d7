use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "telemetry-agent", version, about = "HTTP telemetry agent demo host")]
pub struct Cli {
    /// Configuration file path (optional; defaults and environment apply without it)
    #[arg(short, long, global = true, env = "TELEMETRY_AGENT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start the demo host with the agent attached (default)
    Start,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },

    /// Show version information
    Version,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ConfigCommands {
    /// Display current configuration (with account identifiers masked)
    Show,

    /// Validate configuration file
    Validate,
}

impl Cli {
    /// Get the command to execute, defaulting to Start if none provided
    pub fn get_command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Start)
    }
}
