//! Connection-pool and long-query analysis over processlist captures.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use lens_ingest::{Connection, DbSnapshot};
use serde::Serialize;
use tracing::debug;

/// Queries running longer than this many seconds are reported.
pub const LONG_QUERY_SECONDS: u64 = 60;

/// Entries in the long-query list.
pub const MAX_LONG_QUERIES: usize = 20;

/// Pool usage across all captures.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PoolUsage {
    /// Captures analyzed.
    pub snapshots: usize,
    /// Mean open connections.
    pub avg_total: f64,
    /// Most open connections in one capture.
    pub peak_total: u32,
    /// Mean active connections.
    pub avg_active: f64,
    /// Most active connections in one capture.
    pub peak_active: u32,
    /// Server-side limit used for utilization.
    pub max_connections: Option<u32>,
    /// Mean utilization percentage.
    pub avg_utilization_percent: Option<f64>,
    /// Peak utilization percentage.
    pub peak_utilization_percent: Option<f64>,
}

/// Connection counts for one schema.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseUsage {
    /// Schema name.
    pub database: String,
    /// Mean connections per capture.
    pub avg_connections: f64,
    /// Most connections in one capture.
    pub peak_connections: u32,
}

/// A statement that ran past [`LONG_QUERY_SECONDS`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LongQuery {
    /// Schema.
    pub database: Option<String>,
    /// Statement text.
    pub query: Option<String>,
    /// Longest elapsed time observed.
    pub elapsed_seconds: u64,
    /// Account.
    pub user: String,
    /// Client host.
    pub host: String,
    /// Command class.
    pub command: String,
    /// Thread state.
    pub state: Option<String>,
    /// Capture of the longest observation.
    pub seen_at: Option<DateTime<Utc>>,
}

/// Connection counts at one capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DbPoint {
    /// Capture time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Connections listed.
    pub total: u32,
    /// Non-idle connections.
    pub active: u32,
    /// Idle connections.
    pub sleeping: u32,
}

/// Finished database analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DbAnalysis {
    /// Pool usage.
    pub pool: PoolUsage,
    /// Per-schema usage, sorted by name.
    pub databases: Vec<DatabaseUsage>,
    /// Long-running queries, longest first.
    pub long_queries: Vec<LongQuery>,
    /// Counts per capture.
    pub timeline: Vec<DbPoint>,
}

/// Returns true for a statement that has run too long.
#[must_use]
pub fn is_long_running(conn: &Connection) -> bool {
    conn.elapsed_seconds > LONG_QUERY_SECONDS && !conn.is_sleeping() && !conn.is_daemon()
}

/// Analyzes processlist captures.
#[derive(Debug, Clone, Copy, Default)]
pub struct DbAnalyzer {
    max_connections: Option<u32>,
}

impl DbAnalyzer {
    /// Creates an analyzer without a connection limit.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_connections: None,
        }
    }

    /// Sets the server limit used for utilization.
    #[must_use]
    pub const fn with_max_connections(mut self, max: Option<u32>) -> Self {
        self.max_connections = max;
        self
    }

    /// Analyzes captures in timestamp order; undated captures come last.
    #[must_use]
    pub fn analyze(&self, snapshots: &[DbSnapshot]) -> DbAnalysis {
        let mut ordered: Vec<&DbSnapshot> = snapshots.iter().collect();
        ordered.sort_by_key(|s| (s.timestamp.is_none(), s.timestamp));

        let mut analysis = DbAnalysis::default();
        if ordered.is_empty() {
            analysis.pool.max_connections = self.max_connections;
            return analysis;
        }

        let mut sum_total = 0u64;
        let mut sum_active = 0u64;
        let mut per_db: BTreeMap<String, (u64, u32)> = BTreeMap::new();
        let mut long: HashMap<(Option<String>, Option<String>), LongQuery> = HashMap::new();

        for snapshot in &ordered {
            let stats = &snapshot.stats;
            sum_total += u64::from(stats.total);
            sum_active += u64::from(stats.active);
            analysis.pool.peak_total = analysis.pool.peak_total.max(stats.total);
            analysis.pool.peak_active = analysis.pool.peak_active.max(stats.active);
            analysis.timeline.push(DbPoint {
                timestamp: snapshot.timestamp,
                total: stats.total,
                active: stats.active,
                sleeping: stats.sleeping,
            });

            for (db, &count) in &stats.per_database {
                let entry = per_db.entry(db.clone()).or_insert((0, 0));
                entry.0 += u64::from(count);
                entry.1 = entry.1.max(count);
            }

            for conn in snapshot.connections.iter().filter(|c| is_long_running(c)) {
                let key = (conn.database.clone(), conn.query.clone());
                let longer = long
                    .get(&key)
                    .is_none_or(|existing| conn.elapsed_seconds > existing.elapsed_seconds);
                if longer {
                    long.insert(
                        key,
                        LongQuery {
                            database: conn.database.clone(),
                            query: conn.query.clone(),
                            elapsed_seconds: conn.elapsed_seconds,
                            user: conn.user.clone(),
                            host: conn.host.clone(),
                            command: conn.command.clone(),
                            state: conn.state.clone(),
                            seen_at: snapshot.timestamp,
                        },
                    );
                }
            }
        }

        let n = ordered.len() as f64;
        analysis.pool.snapshots = ordered.len();
        analysis.pool.avg_total = sum_total as f64 / n;
        analysis.pool.avg_active = sum_active as f64 / n;
        analysis.pool.max_connections = self.max_connections;
        if let Some(max) = self.max_connections.filter(|m| *m > 0) {
            let max = f64::from(max);
            analysis.pool.avg_utilization_percent = Some(analysis.pool.avg_total * 100.0 / max);
            analysis.pool.peak_utilization_percent =
                Some(f64::from(analysis.pool.peak_total) * 100.0 / max);
        }

        analysis.databases = per_db
            .into_iter()
            .map(|(database, (sum, peak))| DatabaseUsage {
                database,
                avg_connections: sum as f64 / n,
                peak_connections: peak,
            })
            .collect();

        let mut long_queries: Vec<LongQuery> = long.into_values().collect();
        long_queries.sort_by(|a, b| {
            b.elapsed_seconds
                .cmp(&a.elapsed_seconds)
                .then_with(|| a.database.cmp(&b.database))
                .then_with(|| a.query.cmp(&b.query))
        });
        long_queries.truncate(MAX_LONG_QUERIES);
        analysis.long_queries = long_queries;

        debug!(
            snapshots = analysis.pool.snapshots,
            peak_total = analysis.pool.peak_total,
            long_queries = analysis.long_queries.len(),
            "analyzed processlist captures"
        );
        analysis
    }
}
