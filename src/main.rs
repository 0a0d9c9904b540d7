use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use telemetry_agent::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config_path = args.config.as_deref();

    // The start command installs tracing itself, with the log capture layer
    let command = args.get_command();
    if !matches!(command, cli::Commands::Start) {
        init_tracing();
    }

    match command {
        cli::Commands::Start => {
            commands::start::execute(config_path).await?;
        }
        cli::Commands::Config { action } => match action {
            cli::ConfigCommands::Show => commands::config::show(config_path)?,
            cli::ConfigCommands::Validate => commands::config::validate(config_path)?,
        },
        cli::Commands::Version => {
            println!("Telemetry Agent v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
