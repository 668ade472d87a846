//! CLI error handling with user-friendly messages.
//!
//! Centralizes startup error handling, providing consistent formatting and
//! the non-zero exit code the scheduler watches for.

use std::fmt;
use std::process;
use tapeline::catalog::CatalogError;
use tapeline::config::ConfigFileError;
use tapeline::pipeline::PipelineError;
use tapeline::tape::TapeError;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration file error
    Config(ConfigFileError),
    /// Catalog connection or query failed during startup
    Catalog(CatalogError),
    /// Pipeline setup failed (device open, drive resolution)
    Startup(PipelineError),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        // Print additional help for specific errors
        match self {
            CliError::Catalog(CatalogError::AuthFileRead { .. })
            | CliError::Catalog(CatalogError::AuthFileMalformed { .. }) => {
                eprintln!();
                eprintln!("The credentials file must hold one line:");
                eprintln!("  <user> <password> <dbname>");
            }
            CliError::Catalog(CatalogError::StorageNotProvisioned(pool)) => {
                eprintln!();
                eprintln!(
                    "Pool {} has no drive mapped in the catalog. Load the tape \
                     and/or update the Storage and Pool tables.",
                    pool
                );
            }
            CliError::Startup(PipelineError::Tape(TapeError::Open { .. })) => {
                eprintln!();
                eprintln!("Common issues:");
                eprintln!("  1. The drive device path in the Storage table is stale");
                eprintln!("  2. Permissions: the tape device usually needs group 'tape'");
                eprintln!("  3. Another process holds the drive open");
            }
            _ => {}
        }

        process::exit(2)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(e) => write!(f, "Configuration error: {}", e),
            CliError::Catalog(e) => write!(f, "Catalog error: {}", e),
            CliError::Startup(e) => write!(f, "Startup failed: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Config(e) => Some(e),
            CliError::Catalog(e) => Some(e),
            CliError::Startup(e) => Some(e),
            CliError::LoggingInit(_) => None,
        }
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e)
    }
}

impl From<CatalogError> for CliError {
    fn from(e: CatalogError) -> Self {
        CliError::Catalog(e)
    }
}

impl From<PipelineError> for CliError {
    fn from(e: PipelineError) -> Self {
        CliError::Startup(e)
    }
}
