//! CLI error types and exit codes

use thiserror::Error;

use nbsync_connector::error::ConnectorError;
use nbsync_provisioning::SyncError;

use crate::config::ConfigError;

/// Exit codes for the CLI
/// - 0: Success
/// - 1: Run finished with failed operations
/// - 2: Configuration error
/// - 3: Run aborted
pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Client setup failed: {0}")]
    Client(#[from] ConnectorError),

    #[error("Sync aborted: {0}")]
    Aborted(#[from] SyncError),

    #[error("Sync finished with {failures} failed operation(s)")]
    RunFailed { failures: usize },

    #[error("Failed to write report: {0}")]
    Output(String),
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::RunFailed { .. } | CliError::Output(_) => 1,
            CliError::Config(_) | CliError::Client(_) => 2,
            CliError::Aborted(_) => 3,
        }
    }

    /// Print the error to stderr
    pub fn print(&self) {
        if std::env::var("NO_COLOR").is_err() {
            eprintln!("\x1b[31mError:\x1b[0m {self}");
        } else {
            eprintln!("Error: {self}");
        }
    }
}
