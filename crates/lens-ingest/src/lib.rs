//! # lens-ingest
//!
//! Streaming ingestion for incident log archives.
//!
//! This crate provides:
//!
//! - [`ErrorStreamParser`]: Pod error streams into classified [`LogEvent`]s
//! - [`SnapshotTextParser`]: Sectioned cluster-metrics snapshots
//! - [`ProcesslistParser`]: Database connection-list dumps
//! - [`PodStreamParser`]: Raw pod logs into bounded summaries
//! - [`classify`]: The pattern taxonomy and its severity weights
//! - [`EventBudget`]: Global event cap with per-file coverage
//!
//! Every parser reads one line at a time; no file is loaded whole.
//!
//! ## Example
//!
//! ```rust
//! use lens_ingest::{ErrorStreamParser, TimeRange};
//!
//! let parser = ErrorStreamParser::new(TimeRange::unbounded());
//! let parsed = parser.parse_str(
//!     "[api-7d9f8c6b5-x2x4q] 2024-01-15T10:00:00Z Error: connect ECONNREFUSED 10.0.0.5:6379\n",
//! );
//!
//! assert_eq!(parsed.events.len(), 1);
//! assert_eq!(parsed.events[0].categories, vec!["redis_connection"]);
//! assert_eq!(parsed.events[0].deployment, "api");
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod classifier;
pub mod error;
pub mod error_stream;
pub mod pod_stream;
pub mod processlist;
pub mod snapshot;
pub mod types;
pub mod util;

// Re-export main types
pub use budget::{BudgetOutcome, EventBudget, MAX_EVENTS, MIN_EVENTS_PER_FILE, sort_events};
pub use classifier::{
    Classification, TAXONOMY, UNCATEGORIZED, categories, category_rank, classify, extract_bot_id,
    severity_of,
};
pub use error::{IngestError, Result};
pub use error_stream::{ErrorStreamParser, ParsedErrorLog};
pub use pod_stream::{LevelCounts, LogBucket, MessageSignature, PodStreamParser, PodStreamSummary};
pub use processlist::{Connection, DbSnapshot, DbSnapshotStats, ProcesslistParser};
pub use snapshot::{
    DbPoolSummary, DeploymentReading, MetricSnapshot, NodeReading, PodConnections, PodReading,
    PoolConfig, SnapshotTextParser, sort_snapshots,
};
pub use types::{FileStats, Level, LogEvent, TimeRange};
pub use util::{BUCKET_SECONDS, bucket_start, deployment_from_pod, parse_bound};
