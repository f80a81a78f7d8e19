//! Cascade CLI - Command-line interface
//!
//! Provides command-line access to the transcode-and-upload pipeline.

mod commands;

use std::path::PathBuf;

use cascade_core::tracing_setup::{CliLogLevel, init_tracing};
use clap::Parser;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(about = "Transcode a video file and upload it in segments")]
struct Cli {
    /// Console log level
    #[arg(long, default_value = "info")]
    log_level: CliLogLevel,

    /// Directory for full debug logs
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())?;

    commands::handle_command(cli.command).await?;

    Ok(())
}
