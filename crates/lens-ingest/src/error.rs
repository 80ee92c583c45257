//! Error types for archive ingestion.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while reading archive inputs.
///
/// Per-line problems never surface here: malformed lines are skipped inside
/// the parsers. These errors describe whole-file or argument failures.
#[derive(Debug, Error)]
pub enum IngestError {
    /// An archive file could not be opened or read.
    #[error("I/O error reading {}: {source}", path.display())]
    Io {
        /// The file being read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A timestamp argument could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// The start of a time range lies after its end.
    #[error("invalid time range: start is after end")]
    InvalidTimeRange,
}

impl IngestError {
    /// Wraps an I/O error with the path it occurred on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let err = IngestError::InvalidTimestamp("yesterday".to_string());
        assert_eq!(err.to_string(), "invalid timestamp: yesterday");

        let err = IngestError::InvalidTimeRange;
        assert_eq!(err.to_string(), "invalid time range: start is after end");
    }

    #[test]
    fn io_error_names_the_path() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = IngestError::io("/archive/errors_20240115_103000.log", source);
        let msg = err.to_string();
        assert!(msg.contains("errors_20240115_103000.log"));
        assert!(msg.contains("file not found"));
    }

    #[test]
    fn io_error_exposes_source() {
        use std::error::Error as _;
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = IngestError::io("x.log", source);
        assert!(err.source().is_some());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IngestError>();
    }
}
