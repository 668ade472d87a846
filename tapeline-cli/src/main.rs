//! Tapeline CLI - command-line interface
//!
//! This binary wires the tapeline library into a long-lived backup process.
//!
//! # Architecture
//!
//! The CLI is organized into:
//! - `Cli`: Argument parsing (clap)
//! - `runner`: Resource acquisition and pipeline wiring
//! - `CliError`: Centralized error handling with user-friendly messages
//!
//! # Configuration
//!
//! Settings are loaded from `~/.tapeline/config.ini` on startup.
//! CLI arguments override config file values when specified.

mod error;
mod runner;

use clap::Parser;
use error::CliError;
use tapeline::orchestrator::RunOutcome;

#[derive(Parser)]
#[command(name = "tapeline")]
#[command(version = tapeline::VERSION)]
#[command(about = "Scheduled incremental backup to a robotic tape library", long_about = None)]
struct Cli {
    /// Numeric pool id for pipeline A; the paired pool is derived from the
    /// catalog
    pool_id: i64,

    /// Configuration file path (default: ~/.tapeline/config.ini)
    #[arg(long)]
    config: Option<String>,

    /// Catalog credentials file (default: from config)
    #[arg(long)]
    auth_file: Option<String>,

    /// Fire every schedule class once immediately, then exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match runner::run(cli).await {
        Ok(RunOutcome::Completed) => {}
        Ok(RunOutcome::Interrupted) => std::process::exit(1),
        Ok(RunOutcome::Failed) => std::process::exit(1),
        Err(e) => e.exit(),
    }
}
