//! Archive file discovery.
//!
//! Inputs are matched by file name in the archive root; raw pod logs live
//! under `pod-logs/`. Every list is sorted by file name, which orders the
//! embedded date stamps chronologically.

use std::path::{Path, PathBuf};

use lens_analyze::ArchiveInputs;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::{CliError, Result};

/// Directory holding raw pod logs.
pub const POD_LOG_DIR: &str = "pod-logs";

static ERROR_LOG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^errors_\d{8}_\d{6}\.log$").unwrap_or_else(|_| unreachable!()));

static METRICS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^metrics_\d{8}_\d{6}\.txt$").unwrap_or_else(|_| unreachable!()));

static DB_DEBUG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(db_debug|processlist).*\.(log|txt)$").unwrap_or_else(|_| unreachable!())
});

/// Kind of archive file a name denotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Error-stream log.
    ErrorLog,
    /// Metrics snapshot.
    Metrics,
    /// Processlist dump.
    DbDebug,
}

/// Classifies a file name in the archive root.
#[must_use]
pub fn input_kind(file_name: &str) -> Option<InputKind> {
    if ERROR_LOG.is_match(file_name) {
        Some(InputKind::ErrorLog)
    } else if METRICS.is_match(file_name) {
        Some(InputKind::Metrics)
    } else if DB_DEBUG.is_match(file_name) {
        Some(InputKind::DbDebug)
    } else {
        None
    }
}

/// Finds the inputs in an archive directory.
///
/// # Errors
///
/// Returns [`CliError::ArchiveNotFound`] if `root` is not a directory, or
/// [`CliError::Io`] if it cannot be listed.
pub fn discover(root: &Path) -> Result<ArchiveInputs> {
    if !root.is_dir() {
        return Err(CliError::ArchiveNotFound(root.to_path_buf()));
    }

    let mut inputs = ArchiveInputs::default();
    let mut db_candidates = Vec::new();
    for path in sorted_files(root)? {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        match input_kind(name) {
            Some(InputKind::ErrorLog) => inputs.error_logs.push(path),
            Some(InputKind::Metrics) => inputs.metrics.push(path),
            Some(InputKind::DbDebug) => db_candidates.push(path),
            None => {}
        }
    }
    inputs.db_debug = db_candidates.into_iter().next();

    let pod_dir = root.join(POD_LOG_DIR);
    if pod_dir.is_dir() {
        inputs.pod_logs = sorted_files(&pod_dir)?
            .into_iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
            .collect();
    }

    debug!(
        root = %root.display(),
        error_logs = inputs.error_logs.len(),
        metrics = inputs.metrics.len(),
        db_debug = inputs.db_debug.is_some(),
        pod_logs = inputs.pod_logs.len(),
        "discovered archive inputs"
    );
    Ok(inputs)
}

fn sorted_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("errors_20240115_103000.log", Some(InputKind::ErrorLog) ; "error log")]
    #[test_case("errors_2024011_103000.log", None ; "short date")]
    #[test_case("errors_20240115_103000.log.gz", None ; "compressed")]
    #[test_case("metrics_20240115_103000.txt", Some(InputKind::Metrics) ; "metrics")]
    #[test_case("metrics_20240115_103000.log", None ; "metrics wrong extension")]
    #[test_case("db_debug.log", Some(InputKind::DbDebug) ; "db debug")]
    #[test_case("processlist_20240115.txt", Some(InputKind::DbDebug) ; "processlist")]
    #[test_case("notes.txt", None ; "unrelated")]
    fn classifies_names(name: &str, expected: Option<InputKind>) {
        assert_eq!(input_kind(name), expected);
    }

    #[test]
    fn missing_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(discover(&missing), Err(CliError::ArchiveNotFound(_))));
    }

    #[test]
    fn finds_and_orders_inputs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for name in [
            "errors_20240115_110000.log",
            "errors_20240115_100000.log",
            "metrics_20240115_100500.txt",
            "processlist_b.txt",
            "db_debug_a.log",
            "README.md",
        ] {
            std::fs::write(root.join(name), "").unwrap();
        }
        std::fs::create_dir(root.join(POD_LOG_DIR)).unwrap();
        std::fs::write(root.join(POD_LOG_DIR).join("worker-0.log"), "").unwrap();
        std::fs::write(root.join(POD_LOG_DIR).join("api-1.log"), "").unwrap();
        std::fs::write(root.join(POD_LOG_DIR).join("notes.txt"), "").unwrap();

        let inputs = discover(root).unwrap();
        let names = |paths: &[PathBuf]| -> Vec<String> {
            paths
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(
            names(&inputs.error_logs),
            vec!["errors_20240115_100000.log", "errors_20240115_110000.log"]
        );
        assert_eq!(names(&inputs.metrics), vec!["metrics_20240115_100500.txt"]);
        assert_eq!(inputs.db_debug, Some(root.join("db_debug_a.log")));
        assert_eq!(names(&inputs.pod_logs), vec!["api-1.log", "worker-0.log"]);
    }

    #[test]
    fn empty_archive_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover(dir.path()).unwrap().is_empty());
    }
}
