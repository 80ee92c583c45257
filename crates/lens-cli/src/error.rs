//! CLI error types.

use std::path::PathBuf;

use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    /// The archive directory does not exist.
    #[error("archive directory not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    /// A command-line argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The report could not be rendered.
    #[error("format error: {0}")]
    Format(String),

    /// Writing output failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Format(format!("JSON serialization failed: {err}"))
    }
}

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;
