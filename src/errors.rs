//! Error types for fleet operations

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur while provisioning or tearing down user sandboxes
#[derive(Error, Debug)]
pub enum FleetError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Roster format error: {0}")]
    Format(String),

    #[error("No such file or directory: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Command '{command}' exited with code {exit_code}: {output}")]
    Command {
        command: String,
        exit_code: i32,
        output: String,
    },

    #[error("Copy failed: {0}")]
    Copy(String),

    #[error("Permission denied: {0}")]
    Privilege(String),

    #[error("Account error: {0}")]
    Account(String),

    #[error("Presenter error: {0}")]
    Presenter(String),

    #[error("Usage error: {0}")]
    Usage(String),
}

impl FleetError {
    /// Fatal errors abort the whole invocation; the rest are confined to one roster row.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            FleetError::Config(_)
                | FleetError::Format(_)
                | FleetError::NotFound { .. }
                | FleetError::Privilege(_)
                | FleetError::Usage(_)
        )
    }

    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        FleetError::NotFound { path: path.into() }
    }
}
