//! # lens-analyze
//!
//! Correlation, issue detection and reporting for incident archives.
//!
//! This crate turns the records produced by `lens-ingest` into a single
//! [`AnalysisReport`]:
//!
//! - [`ErrorAggregator`] rolls classified events up by category, pod, bot and time
//! - [`MetricsAnalyzer`] builds node and deployment series, scaling events and alerts
//! - [`DbAnalyzer`] summarizes connection-pool usage and long-running queries
//! - [`IssueDetector`] evaluates an ordered rule table over all three
//! - [`RecommendationEngine`] derives one prioritized action per issue
//! - [`Pipeline`] drives the whole run for a set of archive files
//!
//! ## Quick Start
//!
//! ```rust
//! use lens_analyze::{DetectionInput, ErrorAggregator, IssueDetector, IssueSeverity};
//! use lens_analyze::{DbAnalysis, MetricsAnalysis};
//! use lens_ingest::{ErrorStreamParser, TimeRange};
//!
//! let mut log = String::new();
//! for i in 0..60 {
//!     log.push_str(&format!(
//!         "[api-7d9f8c6b5-x2x4q] 2024-01-15T10:00:{:02}Z Error: connect ECONNREFUSED 10.0.0.5:6379\n",
//!         i
//!     ));
//! }
//! let parsed = ErrorStreamParser::new(TimeRange::unbounded()).parse_str(&log);
//!
//! let mut aggregator = ErrorAggregator::new();
//! aggregator.extend(&parsed.events);
//! let errors = aggregator.finish();
//!
//! let issues = IssueDetector::new().detect(&DetectionInput {
//!     errors: &errors,
//!     metrics: &MetricsAnalysis::default(),
//!     database: &DbAnalysis::default(),
//! });
//! assert_eq!(issues[0].id, "redis-connection");
//! assert_eq!(issues[0].severity, IssueSeverity::Critical);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aggregator;
pub mod db;
pub mod detector;
pub mod formatter;
pub mod metrics;
pub mod pipeline;
pub mod recommend;
pub mod types;

pub use aggregator::{BotTally, ErrorAggregator, ErrorAnalysis, ErrorCategory, PodTally, TimelineBucket};
pub use db::{DatabaseUsage, DbAnalysis, DbAnalyzer, DbPoint, LongQuery, PoolUsage, is_long_running};
pub use detector::{
    CATEGORY_RULES, CategoryRule, DetectionInput, DetectionRule, IssueDetector, Threshold,
    default_rules,
};
pub use formatter::{format_as_json, format_as_json_compact, format_summary};
pub use metrics::{
    HotPod, MetricsAnalysis, MetricsAnalyzer, NodeAlert, NodeResource, ScaleDirection,
    ScalingEvent,
};
pub use pipeline::{ArchiveInputs, Pipeline, PipelineConfig};
pub use recommend::RecommendationEngine;
pub use types::{
    AnalysisReport, Estimate, Issue, IssueSeverity, Recommendation, RecommendationCategory,
    RunStats,
};
