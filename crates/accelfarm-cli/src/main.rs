use clap::Parser;
use tracing_subscriber::EnvFilter;

use accelfarm_pipeline::FarmConfig;

mod cli;
mod demo;

use cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();

    tracing::info!("accelfarm v{}", env!("CARGO_PKG_VERSION"));

    // Load or create config.
    let config = if let Some(config_path) = &cli.config {
        let data = std::fs::read_to_string(config_path)?;
        serde_json::from_str(&data)?
    } else {
        FarmConfig::default()
    };

    match cli.command {
        Command::Demo(args) => demo::run(config, args)?,
    }

    Ok(())
}
