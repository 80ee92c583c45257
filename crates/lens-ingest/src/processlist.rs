//! Parser for database connection-list dumps.
//!
//! The dump is a series of `SHOW FULL PROCESSLIST` captures in batch (tab
//! separated) form, each introduced by a date-stamp line:
//!
//! ```text
//! Mon Jan 15 10:30:00 UTC 2024
//! Id	User	Host	db	Command	Time	State	Info
//! 42	app	10.0.0.5:51234	orders	Query	125	Sending data	SELECT ...
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::util::{LineReader, parse_date_stamp, parse_iso8601, truncate_chars};

/// Longest query text kept per connection.
pub const MAX_QUERY_CHARS: usize = 1000;

/// One row of a processlist capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Connection {
    /// Connection id.
    pub id: u64,
    /// Account name.
    pub user: String,
    /// Client host and port.
    pub host: String,
    /// Selected schema.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Command class (`Query`, `Sleep`, `Daemon`, ...).
    pub command: String,
    /// Seconds spent in the current state.
    pub elapsed_seconds: u64,
    /// Thread state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Statement text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl Connection {
    /// Returns true for idle connections.
    #[must_use]
    pub fn is_sleeping(&self) -> bool {
        self.command.eq_ignore_ascii_case("sleep")
    }

    /// Returns true for server background threads.
    #[must_use]
    pub fn is_daemon(&self) -> bool {
        self.command.eq_ignore_ascii_case("daemon")
    }
}

/// Aggregates over the connections of one capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbSnapshotStats {
    /// Connections listed.
    pub total: u32,
    /// Connections in `Sleep`.
    pub sleeping: u32,
    /// Connections that are neither sleeping nor daemon threads.
    pub active: u32,
    /// Connections per schema; rows without one count under `(none)`.
    pub per_database: BTreeMap<String, u32>,
    /// Longest elapsed time among non-sleeping connections.
    pub longest_seconds: u64,
}

impl DbSnapshotStats {
    /// Computes stats for a list of connections.
    #[must_use]
    pub fn from_connections(connections: &[Connection]) -> Self {
        let mut stats = Self::default();
        for conn in connections {
            stats.total += 1;
            if conn.is_sleeping() {
                stats.sleeping += 1;
            } else if !conn.is_daemon() {
                stats.active += 1;
                stats.longest_seconds = stats.longest_seconds.max(conn.elapsed_seconds);
            }
            let db = conn.database.as_deref().unwrap_or("(none)");
            *stats.per_database.entry(db.to_string()).or_insert(0) += 1;
        }
        stats
    }
}

/// One processlist capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DbSnapshot {
    /// Capture time; absent for rows that preceded the first stamp.
    pub timestamp: Option<DateTime<Utc>>,
    /// Listed connections.
    pub connections: Vec<Connection>,
    /// Derived aggregates.
    pub stats: DbSnapshotStats,
}

impl DbSnapshot {
    fn close(timestamp: Option<DateTime<Utc>>, connections: Vec<Connection>) -> Self {
        let stats = DbSnapshotStats::from_connections(&connections);
        Self {
            timestamp,
            connections,
            stats,
        }
    }
}

/// Recognizes a capture boundary, returning its timestamp.
///
/// Accepts `date` output or an ISO stamp, optionally wrapped in `=`, `-` or
/// `#` rules such as `=== 2024-01-15T10:30:00Z ===`.
#[must_use]
pub fn parse_boundary(line: &str) -> Option<DateTime<Utc>> {
    if line.contains('\t') {
        return None;
    }
    let inner = line.trim_matches(|c: char| c == '=' || c == '-' || c == '#' || c.is_whitespace());
    if inner.is_empty() {
        return None;
    }
    parse_date_stamp(inner).or_else(|| parse_iso8601(inner))
}

fn nullable(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "NULL")
        .map(str::to_string)
}

/// Parses one tab-separated row; the column-header row and malformed rows yield `None`.
#[must_use]
pub fn parse_row(line: &str) -> Option<Connection> {
    let mut cols = line.split('\t');
    let id = cols.next()?.trim().parse::<u64>().ok()?;
    let user = cols.next()?.trim().to_string();
    let host = cols.next()?.trim().to_string();
    let database = nullable(cols.next());
    let command = cols.next()?.trim().to_string();
    let elapsed_seconds = cols
        .next()
        .and_then(|t| t.trim().parse::<u64>().ok())
        .unwrap_or(0);
    let state = nullable(cols.next());
    let info = cols.collect::<Vec<_>>().join("\t");
    let query = nullable(Some(info.as_str())).map(|q| truncate_chars(&q, MAX_QUERY_CHARS));

    if command.is_empty() {
        return None;
    }

    Some(Connection {
        id,
        user,
        host,
        database,
        command,
        elapsed_seconds,
        state,
        query,
    })
}

/// Streaming state: the open capture plus those already closed.
#[derive(Debug, Default)]
pub struct ProcesslistState {
    current_timestamp: Option<DateTime<Utc>>,
    current_rows: Vec<Connection>,
    stamped: bool,
    closed: Vec<DbSnapshot>,
}

impl ProcesslistState {
    /// Creates empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line.
    pub fn process_line(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        if let Some(ts) = parse_boundary(line) {
            self.close_current();
            self.current_timestamp = Some(ts);
            self.stamped = true;
            return;
        }
        if let Some(conn) = parse_row(line) {
            self.current_rows.push(conn);
        }
    }

    fn close_current(&mut self) {
        let rows = std::mem::take(&mut self.current_rows);
        if self.stamped || !rows.is_empty() {
            self.closed.push(DbSnapshot::close(self.current_timestamp, rows));
        }
    }

    /// Closes the open capture and returns all captures in file order.
    #[must_use]
    pub fn finish(mut self) -> Vec<DbSnapshot> {
        self.close_current();
        self.closed
    }
}

/// Parser for processlist dump files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcesslistParser;

impl ProcesslistParser {
    /// Creates a parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Streams a dump file into captures.
    pub async fn parse_file(&self, path: &Path) -> Result<Vec<DbSnapshot>> {
        let mut reader = LineReader::open(path).await?;
        let mut state = ProcesslistState::new();

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| IngestError::io(path, e))?
        {
            state.process_line(&line);
        }

        let snapshots = state.finish();
        debug!(
            path = %path.display(),
            snapshots = snapshots.len(),
            "parsed processlist dump"
        );
        Ok(snapshots)
    }

    /// Parses in-memory text.
    #[must_use]
    pub fn parse_str(&self, text: &str) -> Vec<DbSnapshot> {
        let mut state = ProcesslistState::new();
        for line in text.lines() {
            state.process_line(line);
        }
        state.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    const DUMP: &str = "\
1\troot\tlocalhost\tNULL\tQuery\t0\tstarting\tSHOW FULL PROCESSLIST
Mon Jan 15 10:30:00 UTC 2024
Id\tUser\tHost\tdb\tCommand\tTime\tState\tInfo
5\tevent_scheduler\tlocalhost\tNULL\tDaemon\t9000\tWaiting on empty queue\tNULL
42\tapp\t10.0.0.5:51234\torders\tQuery\t125\tSending data\tSELECT * FROM orders WHERE id > 10
43\tapp\t10.0.0.6:51240\torders\tSleep\t300\t\tNULL
44\tapp\t10.0.0.7:51241\tusers\tQuery\t2\texecuting\tUPDATE users SET seen = 1
not a row at all
=== 2024-01-15T10:35:00Z ===
Id\tUser\tHost\tdb\tCommand\tTime\tState\tInfo
42\tapp\t10.0.0.5:51234\torders\tQuery\t425\tSending data\tSELECT * FROM orders WHERE id > 10
";

    mod row_tests {
        use super::*;
        use test_case::test_case;

        #[test]
        fn full_row() {
            let conn = parse_row("42\tapp\t10.0.0.5:51234\torders\tQuery\t125\tSending data\tSELECT 1")
                .unwrap();
            assert_eq!(conn.id, 42);
            assert_eq!(conn.database.as_deref(), Some("orders"));
            assert_eq!(conn.elapsed_seconds, 125);
            assert_eq!(conn.state.as_deref(), Some("Sending data"));
            assert_eq!(conn.query.as_deref(), Some("SELECT 1"));
        }

        #[test]
        fn null_columns_are_absent() {
            let conn = parse_row("7\tapp\thost\tNULL\tSleep\t10\t\tNULL").unwrap();
            assert!(conn.database.is_none());
            assert!(conn.state.is_none());
            assert!(conn.query.is_none());
            assert!(conn.is_sleeping());
        }

        #[test_case("Id\tUser\tHost\tdb\tCommand\tTime\tState\tInfo" ; "header row")]
        #[test_case("garbage" ; "single column")]
        #[test_case("12\tapp" ; "too short")]
        fn rejected_rows(line: &str) {
            assert!(parse_row(line).is_none());
        }
    }

    mod boundary_tests {
        use super::*;
        use test_case::test_case;

        #[test_case("Mon Jan 15 10:30:00 UTC 2024" ; "date output")]
        #[test_case("Mon Jan 15 10:30:00 2024" ; "date without zone")]
        #[test_case("=== 2024-01-15T10:30:00Z ===" ; "ruled iso")]
        #[test_case("# 2024-01-15 10:30:00" ; "hash iso")]
        #[test_case("---- Mon Jan 15 10:30:00 UTC 2024 ----" ; "ruled date")]
        fn recognized(line: &str) {
            assert!(parse_boundary(line).is_some());
        }

        #[test_case("=====" ; "bare rule")]
        #[test_case("42\tapp\thost\tdb\tQuery\t1\tx\ty" ; "row")]
        fn not_boundaries(line: &str) {
            assert!(parse_boundary(line).is_none());
        }
    }

    mod dump_tests {
        use super::*;

        #[test]
        fn splits_into_captures() {
            let snaps = ProcesslistParser::new().parse_str(DUMP);
            assert_eq!(snaps.len(), 3);
            assert!(snaps[0].timestamp.is_none());
            assert_eq!(snaps[0].connections.len(), 1);
            assert!(snaps[1].timestamp.is_some());
            assert_eq!(snaps[1].connections.len(), 4);
            assert_eq!(snaps[2].connections[0].elapsed_seconds, 425);
        }

        #[test]
        fn stats_exclude_sleep_and_daemon_from_active() {
            let snaps = ProcesslistParser::new().parse_str(DUMP);
            let stats = &snaps[1].stats;
            assert_eq!(stats.total, 4);
            assert_eq!(stats.sleeping, 1);
            assert_eq!(stats.active, 2);
            assert_eq!(stats.longest_seconds, 125);
            assert_eq!(stats.per_database["orders"], 2);
            assert_eq!(stats.per_database["(none)"], 1);
        }

        #[test]
        fn empty_input_yields_nothing() {
            assert!(ProcesslistParser::new().parse_str("").is_empty());
        }

        #[tokio::test]
        async fn parse_file_reads_dump() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("processlist.txt");
            std::fs::write(&path, DUMP).unwrap();

            let snaps = ProcesslistParser::new().parse_file(&path).await.unwrap();
            assert_eq!(snaps.len(), 3);
        }

        #[tokio::test]
        async fn missing_file_is_io_error() {
            let result = ProcesslistParser::new()
                .parse_file(Path::new("/nonexistent/processlist.txt"))
                .await;
            assert!(matches!(result, Err(IngestError::Io { .. })));
        }
    }
}
