use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "accelfarm", version, about = "Task-offload farm demo driver")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Farm configuration file (JSON). Defaults apply when omitted.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand)]
pub enum Command {
    /// Derive a series on the device, then farm window sums over it.
    Demo(DemoArgs),
}

#[derive(Args)]
pub struct DemoArgs {
    /// Series length in elements.
    #[arg(long, default_value_t = 256)]
    pub size: u32,

    /// First window start index.
    #[arg(long, default_value_t = 10)]
    pub start: u32,

    /// One past the last window start index.
    #[arg(long, default_value_t = 120)]
    pub end: u32,

    /// Window span: window i covers [i, i + span] inclusive.
    #[arg(long, default_value_t = 50)]
    pub span: u32,

    /// Override the number of farm workers from the config.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Print the run report as JSON.
    #[arg(long)]
    pub json: bool,
}
