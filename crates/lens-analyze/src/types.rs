//! Core types for archive analysis.
//!
//! This module defines the issue and recommendation records produced by the
//! detector, the run statistics, and the [`AnalysisReport`] handed to
//! renderers.

use chrono::{DateTime, Utc};
use lens_ingest::{LogEvent, PodStreamSummary, TimeRange};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregator::ErrorAnalysis;
use crate::db::DbAnalysis;
use crate::metrics::MetricsAnalysis;

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    /// Service is down or data is being lost.
    Critical,
    /// Service is degraded for a visible share of traffic.
    High,
    /// Noticeable but contained.
    Medium,
    /// Informational or cosmetic.
    Low,
}

impl IssueSeverity {
    /// Sort rank, most severe first.
    #[must_use]
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Critical => 0,
            Self::High => 1,
            Self::Medium => 2,
            Self::Low => 3,
        }
    }

    /// Returns the lowercase name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl std::fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Critical => write!(f, "CRITICAL"),
            Self::High => write!(f, "HIGH"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::Low => write!(f, "LOW"),
        }
    }
}

/// A correlated problem found in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Stable identifier, unique within one report.
    pub id: String,
    /// How bad it is.
    pub severity: IssueSeverity,
    /// Short title.
    pub title: String,
    /// What was observed.
    pub description: String,
    /// Numbers and excerpts backing the observation.
    pub evidence: Vec<String>,
    /// Effect on users or the system.
    pub impact: String,
    /// Deployments, nodes or databases involved.
    pub affected_services: Vec<String>,
    /// Most likely cause.
    pub root_cause: String,
    /// What to do about it.
    pub recommended_action: String,
}

impl Issue {
    /// Creates an issue with empty evidence and text fields.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        severity: IssueSeverity,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            severity,
            title: title.into(),
            description: description.into(),
            evidence: Vec::new(),
            impact: String::new(),
            affected_services: Vec::new(),
            root_cause: String::new(),
            recommended_action: String::new(),
        }
    }

    /// Adds a line of evidence.
    #[must_use]
    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }

    /// Adds several lines of evidence.
    #[must_use]
    pub fn with_evidence_list(mut self, evidence: impl IntoIterator<Item = String>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    /// Sets the impact statement.
    #[must_use]
    pub fn with_impact(mut self, impact: impl Into<String>) -> Self {
        self.impact = impact.into();
        self
    }

    /// Sets the affected services.
    #[must_use]
    pub fn with_affected_services(mut self, services: impl IntoIterator<Item = String>) -> Self {
        self.affected_services = services.into_iter().collect();
        self
    }

    /// Sets the root cause.
    #[must_use]
    pub fn with_root_cause(mut self, root_cause: impl Into<String>) -> Self {
        self.root_cause = root_cause.into();
        self
    }

    /// Sets the recommended action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.recommended_action = action.into();
        self
    }
}

/// Area a recommendation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecommendationCategory {
    /// Cluster, network or backing services.
    Infrastructure,
    /// Settings and limits.
    Configuration,
    /// NLU and model serving.
    MlModel,
    /// CPU, memory and scaling.
    Resources,
    /// Crashes, errors and retries.
    Reliability,
    /// Anything else.
    General,
}

/// Effort or impact estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Estimate {
    /// Small.
    Low,
    /// Moderate.
    Medium,
    /// Large.
    High,
}

/// An action derived from one issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Issue this was derived from.
    pub issue_id: String,
    /// Issue title.
    pub title: String,
    /// 25 to 100, higher first.
    pub priority: u8,
    /// Area of the fix.
    pub category: RecommendationCategory,
    /// What to do.
    pub action: String,
    /// Why.
    pub rationale: String,
    /// Estimated effort.
    pub effort: Estimate,
    /// Estimated impact.
    pub impact: Estimate,
}

/// Counters describing one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Lines read from error logs and pod logs.
    pub total_lines: u64,
    /// Events parsed from error logs inside the time range.
    pub total_events: u64,
    /// Events kept after sampling.
    pub retained_events: u64,
    /// Events removed by sampling.
    pub dropped_events: u64,
    /// Input files attempted.
    pub file_count: u64,
    /// Input files that could not be read.
    pub failed_files: u64,
    /// Earliest event timestamp.
    pub first_timestamp: Option<DateTime<Utc>>,
    /// Latest event timestamp.
    pub last_timestamp: Option<DateTime<Utc>>,
}

/// Everything one run produces.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisReport {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// When the report was built.
    pub generated_at: DateTime<Utc>,
    /// Time filter that was applied.
    pub time_range: TimeRange,
    /// Run counters.
    pub stats: RunStats,
    /// Error-log rollups.
    pub errors: ErrorAnalysis,
    /// Sampled events, sorted by time.
    pub events: Vec<LogEvent>,
    /// Cluster metrics analysis.
    pub metrics: MetricsAnalysis,
    /// Database analysis.
    pub database: DbAnalysis,
    /// Raw pod-log summaries.
    pub pod_logs: Vec<PodStreamSummary>,
    /// Ranked issues.
    pub issues: Vec<Issue>,
    /// Ranked recommendations.
    pub recommendations: Vec<Recommendation>,
}

impl AnalysisReport {
    /// Counts issues of a given severity.
    #[must_use]
    pub fn count_by_severity(&self, severity: IssueSeverity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    /// Returns true if any critical issue was found.
    #[must_use]
    pub fn has_critical_issues(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Critical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod severity_tests {
        use super::*;

        #[test]
        fn rank_orders_most_severe_first() {
            let mut severities = vec![
                IssueSeverity::Low,
                IssueSeverity::Critical,
                IssueSeverity::Medium,
                IssueSeverity::High,
            ];
            severities.sort_by_key(IssueSeverity::rank);
            assert_eq!(
                severities,
                vec![
                    IssueSeverity::Critical,
                    IssueSeverity::High,
                    IssueSeverity::Medium,
                    IssueSeverity::Low,
                ]
            );
        }

        #[test]
        fn serializes_lowercase() {
            let json = serde_json::to_string(&IssueSeverity::High).unwrap();
            assert_eq!(json, "\"high\"");
            assert_eq!(format!("{}", IssueSeverity::High), "HIGH");
        }
    }

    mod issue_tests {
        use super::*;

        #[test]
        fn builder_sets_fields() {
            let issue = Issue::new("redis-connection", IssueSeverity::Critical, "Redis down", "refused")
                .with_evidence("812 events")
                .with_evidence_list(vec!["3 pods".to_string()])
                .with_impact("sessions lost")
                .with_affected_services(vec!["api".to_string()])
                .with_root_cause("redis unreachable")
                .with_action("Check the redis service");

            assert_eq!(issue.evidence.len(), 2);
            assert_eq!(issue.affected_services, vec!["api"]);
            assert_eq!(issue.recommended_action, "Check the redis service");
        }

        #[test]
        fn category_serializes_kebab() {
            let json = serde_json::to_string(&RecommendationCategory::MlModel).unwrap();
            assert_eq!(json, "\"ml-model\"");
        }
    }
}
