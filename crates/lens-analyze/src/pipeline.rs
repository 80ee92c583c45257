//! End-to-end analysis of one incident archive.
//!
//! Files are parsed one at a time. A file that cannot be read is logged and
//! counted in [`RunStats::failed_files`]; it never aborts the run.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use lens_ingest::{
    DbSnapshot, ErrorStreamParser, EventBudget, LogEvent, MAX_EVENTS, MetricSnapshot,
    PodStreamParser, PodStreamSummary, ProcesslistParser, SnapshotTextParser, TimeRange,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregator::ErrorAggregator;
use crate::db::DbAnalyzer;
use crate::detector::{DetectionInput, IssueDetector};
use crate::metrics::MetricsAnalyzer;
use crate::recommend::RecommendationEngine;
use crate::types::{AnalysisReport, RunStats};

/// Pipeline configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Cap on events kept in the report.
    pub max_events: usize,
    /// Records outside this range are skipped.
    pub time_range: TimeRange,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_events: MAX_EVENTS,
            time_range: TimeRange::unbounded(),
        }
    }
}

impl PipelineConfig {
    /// Sets the event cap.
    #[must_use]
    pub const fn with_max_events(mut self, max_events: usize) -> Self {
        self.max_events = max_events;
        self
    }

    /// Sets the time range.
    #[must_use]
    pub const fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = time_range;
        self
    }
}

/// Input files discovered in an archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArchiveInputs {
    /// Error-stream logs in chronological order.
    pub error_logs: Vec<PathBuf>,
    /// Metrics snapshots in chronological order.
    pub metrics: Vec<PathBuf>,
    /// Processlist dump.
    pub db_debug: Option<PathBuf>,
    /// Raw pod logs.
    pub pod_logs: Vec<PathBuf>,
}

impl ArchiveInputs {
    /// Number of files the pipeline will open.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.error_logs.len() + self.metrics.len() + self.pod_logs.len() + usize::from(self.db_debug.is_some())
    }

    /// Returns true if there is nothing to read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.file_count() == 0
    }
}

/// Runs parsing, analysis, detection and recommendation.
#[derive(Debug, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    detector: IssueDetector,
    recommender: RecommendationEngine,
}

impl Pipeline {
    /// Creates a pipeline with the default rule table.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            detector: IssueDetector::new(),
            recommender: RecommendationEngine::new(),
        }
    }

    /// Replaces the issue detector.
    #[must_use]
    pub fn with_detector(mut self, detector: IssueDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Analyzes an archive.
    pub async fn run(&self, inputs: &ArchiveInputs) -> AnalysisReport {
        let range = self.config.time_range;
        let mut stats = RunStats {
            file_count: inputs.file_count() as u64,
            ..RunStats::default()
        };

        let mut aggregator = ErrorAggregator::new();
        let mut per_file: Vec<Vec<LogEvent>> = Vec::with_capacity(inputs.error_logs.len());
        let parser = ErrorStreamParser::new(range);
        for path in &inputs.error_logs {
            match parser.parse_file(path).await {
                Ok(parsed) => {
                    stats.total_lines += parsed.stats.total_lines;
                    stats.total_events += parsed.stats.event_count;
                    stats.first_timestamp = earliest(stats.first_timestamp, parsed.stats.first_timestamp);
                    stats.last_timestamp = latest(stats.last_timestamp, parsed.stats.last_timestamp);
                    aggregator.extend(&parsed.events);
                    per_file.push(parsed.events);
                }
                Err(err) => record_failure(&mut stats, path, &err),
            }
        }
        let errors = aggregator.finish();
        let budget = EventBudget::new(self.config.max_events).apply(per_file);
        stats.retained_events = budget.events.len() as u64;
        stats.dropped_events = budget.dropped as u64;
        info!(
            files = inputs.error_logs.len(),
            events = stats.total_events,
            retained = stats.retained_events,
            dropped = stats.dropped_events,
            categories = errors.categories.len(),
            "error logs analyzed"
        );

        let snapshots = self.read_snapshots(&inputs.metrics, &mut stats).await;
        let metrics = MetricsAnalyzer::new().analyze(&snapshots);
        info!(
            snapshots = metrics.snapshot_count,
            scaling_events = metrics.scaling_events.len(),
            node_alerts = metrics.node_alerts.len(),
            "metrics analyzed"
        );

        let db_snapshots = match &inputs.db_debug {
            Some(path) => self.read_processlist(path, &mut stats).await,
            None => Vec::new(),
        };
        let max_connections = metrics.latest_pool.and_then(|p| p.max_connections);
        let database = DbAnalyzer::new()
            .with_max_connections(max_connections)
            .analyze(&db_snapshots);
        info!(
            captures = database.pool.snapshots,
            long_queries = database.long_queries.len(),
            "database analyzed"
        );

        let pod_logs = self.read_pod_logs(&inputs.pod_logs, &mut stats).await;

        let issues = self.detector.detect(&DetectionInput {
            errors: &errors,
            metrics: &metrics,
            database: &database,
        });
        let recommendations = self.recommender.generate(&issues);
        info!(
            issues = issues.len(),
            recommendations = recommendations.len(),
            failed_files = stats.failed_files,
            "analysis complete"
        );

        AnalysisReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            time_range: range,
            stats,
            errors,
            events: budget.events,
            metrics,
            database,
            pod_logs,
            issues,
            recommendations,
        }
    }

    async fn read_snapshots(&self, paths: &[PathBuf], stats: &mut RunStats) -> Vec<MetricSnapshot> {
        let parser = SnapshotTextParser::new();
        let mut snapshots = Vec::with_capacity(paths.len());
        for path in paths {
            match parser.parse_file(path).await {
                Ok(snapshot) if self.config.time_range.admits(snapshot.timestamp) => {
                    snapshots.push(snapshot);
                }
                Ok(_) => debug!(path = %path.display(), "snapshot outside time range"),
                Err(err) => record_failure(stats, path, &err),
            }
        }
        snapshots
    }

    async fn read_processlist(&self, path: &Path, stats: &mut RunStats) -> Vec<DbSnapshot> {
        match ProcesslistParser::new().parse_file(path).await {
            Ok(mut captures) => {
                captures.retain(|c| self.config.time_range.admits(c.timestamp));
                captures
            }
            Err(err) => {
                record_failure(stats, path, &err);
                Vec::new()
            }
        }
    }

    async fn read_pod_logs(&self, paths: &[PathBuf], stats: &mut RunStats) -> Vec<PodStreamSummary> {
        let parser = PodStreamParser::new(self.config.time_range);
        let mut summaries = Vec::with_capacity(paths.len());
        for path in paths {
            match parser.parse_file(path).await {
                Ok(summary) => {
                    stats.total_lines += summary.total_lines;
                    summaries.push(summary);
                }
                Err(err) => record_failure(stats, path, &err),
            }
        }
        if !summaries.is_empty() {
            info!(pods = summaries.len(), "pod logs summarized");
        }
        summaries
    }
}

fn record_failure(stats: &mut RunStats, path: &Path, err: &lens_ingest::IngestError) {
    warn!(path = %path.display(), error = %err, "skipping unreadable file");
    stats.failed_files += 1;
}

fn earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
