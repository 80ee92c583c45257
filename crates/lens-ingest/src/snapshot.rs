//! Parser for periodic cluster-metrics snapshot files.
//!
//! A snapshot file is a sequence of `--- SECTION ---` blocks, each holding a
//! column-header row followed by whitespace-separated rows (mostly verbatim
//! `kubectl top` / `kubectl get` output). The parser is a small state machine:
//! the active [`Section`] plus a flag recording whether that section's column
//! header has been consumed yet.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::util::{LineReader, parse_file_stamp, parse_timestamp};

/// CPU and memory readings for one node.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeReading {
    /// Node name.
    pub name: String,
    /// CPU usage in millicores.
    pub cpu_millicores: Option<f64>,
    /// CPU usage as a percentage of allocatable.
    pub cpu_percent: Option<f64>,
    /// Memory usage in MiB.
    pub memory_mi: Option<f64>,
    /// Memory usage as a percentage of allocatable.
    pub memory_percent: Option<f64>,
}

/// CPU and memory readings for one pod.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodReading {
    /// Pod name.
    pub name: String,
    /// Namespace, when the snapshot listed one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// CPU usage in millicores.
    pub cpu_millicores: Option<f64>,
    /// Memory usage in MiB.
    pub memory_mi: Option<f64>,
}

/// Replica counts and limits for one deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentReading {
    /// Deployment name.
    pub name: String,
    /// Desired replicas.
    pub desired: Option<u32>,
    /// Ready replicas.
    pub ready: Option<u32>,
    /// Per-container CPU limit in millicores.
    pub cpu_limit_millicores: Option<f64>,
    /// Per-container memory limit in MiB.
    pub memory_limit_mi: Option<f64>,
}

/// Database connection pool summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DbPoolSummary {
    /// Open connections.
    pub total: u32,
    /// Connections executing a statement.
    pub active: u32,
    /// Idle connections.
    pub idle: u32,
    /// Server-side connection limit.
    pub max_connections: Option<u32>,
}

impl DbPoolSummary {
    /// Open connections as a percentage of the limit.
    #[must_use]
    pub fn utilization_percent(&self) -> Option<f64> {
        self.max_connections
            .filter(|max| *max > 0)
            .map(|max| f64::from(self.total) * 100.0 / f64::from(max))
    }
}

/// Database connections held by one pod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodConnections {
    /// Pod name.
    pub pod: String,
    /// Open connections.
    pub connections: u32,
}

/// Connection-pool settings for one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolConfig {
    /// Deployment name.
    pub deployment: String,
    /// Pool size per worker.
    pub pool_size: Option<u32>,
    /// Overflow connections allowed above the pool size.
    pub max_overflow: Option<u32>,
    /// Worker processes per pod.
    pub workers: Option<u32>,
}

impl PoolConfig {
    /// Upper bound of connections one pod can open; `None` if it overflows.
    #[must_use]
    pub fn max_connections_per_pod(&self) -> Option<u32> {
        let per_worker = self.pool_size?.checked_add(self.max_overflow.unwrap_or(0))?;
        per_worker.checked_mul(self.workers.unwrap_or(1))
    }
}

/// One parsed metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricSnapshot {
    /// When the snapshot was taken.
    pub timestamp: Option<DateTime<Utc>>,
    /// File the snapshot came from.
    pub source: PathBuf,
    /// Node readings.
    pub nodes: Vec<NodeReading>,
    /// Pod readings.
    pub pods: Vec<PodReading>,
    /// Deployment readings.
    pub deployments: Vec<DeploymentReading>,
    /// Pod counts per phase/status.
    pub pod_status: BTreeMap<String, u32>,
    /// Database pool summary.
    pub db_pool: Option<DbPoolSummary>,
    /// Database connections per pod.
    pub db_connections: Vec<PodConnections>,
    /// Pool configuration per deployment.
    pub pool_config: Vec<PoolConfig>,
}

/// Sorts snapshots by timestamp; undated snapshots keep their order at the end.
pub fn sort_snapshots(snapshots: &mut [MetricSnapshot]) {
    snapshots.sort_by_key(|s| (s.timestamp.is_none(), s.timestamp));
}

/// Section of a snapshot file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Before the first section header.
    Preamble,
    /// `--- NODES`
    Nodes,
    /// `--- PODS`; `namespaced` is set from the column header.
    Pods {
        /// Rows start with a NAMESPACE column.
        namespaced: bool,
    },
    /// `--- DEPLOYMENTS`
    Deployments,
    /// `--- POD STATUS`
    PodStatus,
    /// `--- DB CONNECTION POOL`
    DbPool,
    /// `--- DB CONNECTIONS`
    DbConnections,
    /// `--- POD CONFIG`
    PodConfig,
    /// A section this parser does not understand; its rows are ignored.
    Unknown,
}

// Longer names first so `POD STATUS` is not taken for `PODS`.
const SECTION_PREFIXES: &[(&str, Section)] = &[
    ("NODES", Section::Nodes),
    ("POD STATUS", Section::PodStatus),
    ("POD CONFIG", Section::PodConfig),
    ("PODS", Section::Pods { namespaced: false }),
    ("DEPLOYMENTS", Section::Deployments),
    ("DB CONNECTION POOL", Section::DbPool),
    ("DB CONNECTIONS", Section::DbConnections),
];

impl Section {
    /// Recognizes a section header line by the prefix of its name, so
    /// annotated headers such as `--- NODES (kubectl top nodes) ---` match.
    #[must_use]
    pub fn from_header(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if !trimmed.starts_with("---") {
            return None;
        }
        let name = trimmed.trim_matches(|c: char| c == '-' || c.is_whitespace());
        let name = name.to_ascii_uppercase();

        let section = SECTION_PREFIXES
            .iter()
            .find(|(prefix, _)| name.starts_with(prefix))
            .map_or(Self::Unknown, |(_, section)| *section);
        Some(section)
    }
}

/// Parses a CPU quantity into millicores: `250m`, `2`, `1.5`, `500000n`.
#[must_use]
pub fn parse_cpu(value: &str) -> Option<f64> {
    let v = value.trim();
    if v.is_empty() || v == "-" || v.starts_with('<') {
        return None;
    }
    let (number, scale) = if let Some(n) = v.strip_suffix('m') {
        (n, 1.0)
    } else if let Some(n) = v.strip_suffix('u') {
        (n, 0.001)
    } else if let Some(n) = v.strip_suffix('n') {
        (n, 0.000_001)
    } else {
        (v, 1000.0)
    };
    number
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n * scale)
}

/// Parses a memory quantity into MiB: `512Mi`, `2Gi`, `1024Ki`, `1G`, plain bytes.
#[must_use]
pub fn parse_memory(value: &str) -> Option<f64> {
    let v = value.trim();
    if v.is_empty() || v == "-" || v.starts_with('<') {
        return None;
    }
    const MIB: f64 = 1024.0 * 1024.0;
    let units: [(&str, f64); 8] = [
        ("Ki", 1.0 / 1024.0),
        ("Mi", 1.0),
        ("Gi", 1024.0),
        ("Ti", 1024.0 * 1024.0),
        ("K", 1000.0 / MIB),
        ("M", 1_000_000.0 / MIB),
        ("G", 1_000_000_000.0 / MIB),
        ("T", 1_000_000_000_000.0 / MIB),
    ];
    let (number, scale) = units
        .iter()
        .find_map(|(suffix, scale)| v.strip_suffix(suffix).map(|n| (n, *scale)))
        .unwrap_or((v, 1.0 / MIB));
    number
        .parse::<f64>()
        .ok()
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n * scale)
}

/// Parses `31%` into `31.0`.
#[must_use]
pub fn parse_percent(value: &str) -> Option<f64> {
    let v = value.trim().trim_end_matches('%');
    v.parse::<f64>().ok().filter(|n| n.is_finite())
}

fn parse_count(value: &str) -> Option<u32> {
    value.trim().parse().ok()
}

/// Parse state for one snapshot file.
#[derive(Debug)]
pub struct SnapshotState {
    section: Section,
    header_seen: bool,
    snapshot: MetricSnapshot,
}

impl SnapshotState {
    /// Creates state for a snapshot read from `source`.
    #[must_use]
    pub fn new(source: impl Into<PathBuf>) -> Self {
        Self {
            section: Section::Preamble,
            header_seen: false,
            snapshot: MetricSnapshot {
                source: source.into(),
                ..MetricSnapshot::default()
            },
        }
    }

    /// Returns the active section.
    #[must_use]
    pub const fn section(&self) -> Section {
        self.section
    }

    /// Feeds one line.
    pub fn process_line(&mut self, line: &str) {
        if let Some(section) = Section::from_header(line) {
            self.section = section;
            self.header_seen = false;
            return;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("===") {
            return;
        }

        if self.section == Section::Preamble {
            self.read_preamble(trimmed);
            return;
        }

        if !self.header_seen {
            self.header_seen = true;
            if let Section::Pods { .. } = self.section {
                let namespaced = trimmed
                    .split_whitespace()
                    .next()
                    .is_some_and(|first| first.eq_ignore_ascii_case("NAMESPACE"));
                self.section = Section::Pods { namespaced };
            }
            return;
        }

        let cols: Vec<&str> = trimmed.split_whitespace().collect();
        match self.section {
            Section::Nodes => self.read_node(&cols),
            Section::Pods { namespaced } => self.read_pod(&cols, namespaced),
            Section::Deployments => self.read_deployment(&cols),
            Section::PodStatus => self.read_pod_status(&cols),
            Section::DbPool => self.read_db_pool(&cols),
            Section::DbConnections => self.read_db_connections(&cols),
            Section::PodConfig => self.read_pod_config(&cols),
            Section::Preamble | Section::Unknown => {}
        }
    }

    /// Returns the parsed snapshot.
    #[must_use]
    pub fn finish(self) -> MetricSnapshot {
        self.snapshot
    }

    fn read_preamble(&mut self, line: &str) {
        if self.snapshot.timestamp.is_some() {
            return;
        }
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("timestamp") {
                self.snapshot.timestamp = parse_timestamp(value.trim());
            }
        }
    }

    fn read_node(&mut self, cols: &[&str]) {
        let [name, cpu, cpu_pct, mem, mem_pct, ..] = cols else {
            return;
        };
        self.snapshot.nodes.push(NodeReading {
            name: (*name).to_string(),
            cpu_millicores: parse_cpu(cpu),
            cpu_percent: parse_percent(cpu_pct),
            memory_mi: parse_memory(mem),
            memory_percent: parse_percent(mem_pct),
        });
    }

    fn read_pod(&mut self, cols: &[&str], namespaced: bool) {
        let (namespace, rest) = if namespaced {
            match cols.split_first() {
                Some((ns, rest)) => (Some((*ns).to_string()), rest),
                None => return,
            }
        } else {
            (None, cols)
        };
        let [name, cpu, mem, ..] = rest else {
            return;
        };
        self.snapshot.pods.push(PodReading {
            name: (*name).to_string(),
            namespace,
            cpu_millicores: parse_cpu(cpu),
            memory_mi: parse_memory(mem),
        });
    }

    fn read_deployment(&mut self, cols: &[&str]) {
        let [name, ready, ..] = cols else {
            return;
        };
        let Some((ready_count, desired)) = ready.split_once('/') else {
            return;
        };
        self.snapshot.deployments.push(DeploymentReading {
            name: (*name).to_string(),
            desired: parse_count(desired),
            ready: parse_count(ready_count),
            cpu_limit_millicores: cols.get(5).and_then(|v| parse_cpu(v)),
            memory_limit_mi: cols.get(6).and_then(|v| parse_memory(v)),
        });
    }

    fn read_pod_status(&mut self, cols: &[&str]) {
        let [status, count, ..] = cols else {
            return;
        };
        if let Some(count) = parse_count(count) {
            *self
                .snapshot
                .pod_status
                .entry((*status).to_string())
                .or_insert(0) += count;
        }
    }

    fn read_db_pool(&mut self, cols: &[&str]) {
        let [total, active, idle, rest @ ..] = cols else {
            return;
        };
        let (Some(total), Some(active), Some(idle)) =
            (parse_count(total), parse_count(active), parse_count(idle))
        else {
            return;
        };
        self.snapshot.db_pool = Some(DbPoolSummary {
            total,
            active,
            idle,
            max_connections: rest.first().and_then(|v| parse_count(v)),
        });
    }

    fn read_db_connections(&mut self, cols: &[&str]) {
        let [pod, count, ..] = cols else {
            return;
        };
        if let Some(connections) = parse_count(count) {
            self.snapshot.db_connections.push(PodConnections {
                pod: (*pod).to_string(),
                connections,
            });
        }
    }

    fn read_pod_config(&mut self, cols: &[&str]) {
        let Some((deployment, rest)) = cols.split_first() else {
            return;
        };
        self.snapshot.pool_config.push(PoolConfig {
            deployment: (*deployment).to_string(),
            pool_size: rest.first().and_then(|v| parse_count(v)),
            max_overflow: rest.get(1).and_then(|v| parse_count(v)),
            workers: rest.get(2).and_then(|v| parse_count(v)),
        });
    }
}

/// Parser for `metrics_<date>_<time>.txt` files.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotTextParser;

impl SnapshotTextParser {
    /// Creates a parser.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Parses one snapshot file, falling back to the file-name stamp for the timestamp.
    pub async fn parse_file(&self, path: &Path) -> Result<MetricSnapshot> {
        let mut reader = LineReader::open(path).await?;
        let mut state = SnapshotState::new(path);

        while let Some(line) = reader
            .next_line()
            .await
            .map_err(|e| IngestError::io(path, e))?
        {
            state.process_line(&line);
        }

        let mut snapshot = state.finish();
        if snapshot.timestamp.is_none() {
            snapshot.timestamp = path
                .file_name()
                .and_then(|name| parse_file_stamp(&name.to_string_lossy()));
        }

        debug!(
            path = %path.display(),
            nodes = snapshot.nodes.len(),
            pods = snapshot.pods.len(),
            deployments = snapshot.deployments.len(),
            "parsed metrics snapshot"
        );
        Ok(snapshot)
    }

    /// Parses in-memory text.
    #[must_use]
    pub fn parse_str(&self, source: impl Into<PathBuf>, text: &str) -> MetricSnapshot {
        let mut state = SnapshotState::new(source);
        for line in text.lines() {
            state.process_line(line);
        }
        state.finish()
    }
}
