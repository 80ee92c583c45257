//! Report rendering.
//!
//! JSON is the machine-readable form; [`format_summary`] is a plain-text
//! digest for a terminal.

#![allow(clippy::format_push_string)]

use lens_ingest::util::truncate_chars;

use crate::types::{AnalysisReport, Issue, IssueSeverity, Recommendation};

const RULE: &str = "───────────────────────────────────────────────────────────────\n";
const BANNER: &str = "═══════════════════════════════════════════════════════════════\n";

/// Categories listed in the summary.
const SUMMARY_CATEGORIES: usize = 10;

/// Formats a report as pretty JSON.
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_as_json(report: &AnalysisReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Formats a report as compact JSON (single line).
///
/// # Errors
///
/// Returns an error if JSON serialization fails.
pub fn format_as_json_compact(report: &AnalysisReport) -> Result<String, serde_json::Error> {
    serde_json::to_string(report)
}

/// Formats a report as a human-readable summary.
#[must_use]
pub fn format_summary(report: &AnalysisReport) -> String {
    let mut output = String::new();

    output.push_str(&format_header(report));
    output.push_str(&format_stats(report));
    output.push_str(&format_categories(report));
    output.push_str(&format_infrastructure(report));

    if report.issues.is_empty() {
        output.push_str("\nNo issues detected.\n");
    } else {
        output.push_str(&format_issues(&report.issues));
    }
    if !report.recommendations.is_empty() {
        output.push_str(&format_recommendations(&report.recommendations));
    }

    output.push('\n');
    output.push_str(BANNER);
    output.push_str(&format!("Run ID: {}\n", report.run_id));
    output.push_str(BANNER);
    output
}

fn format_header(report: &AnalysisReport) -> String {
    let mut header = String::new();
    header.push_str(BANNER);
    header.push_str("                    INCIDENT ANALYSIS\n");
    header.push_str(BANNER);
    header.push_str(&format!(
        "Generated: {}\n",
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    let range = &report.time_range;
    if !range.is_unbounded() {
        let bound = |b: Option<chrono::DateTime<chrono::Utc>>| {
            b.map_or_else(|| "open".to_string(), |t| t.to_rfc3339())
        };
        header.push_str(&format!("Window: {} .. {}\n", bound(range.start), bound(range.end)));
    }
    header
}

fn format_stats(report: &AnalysisReport) -> String {
    let stats = &report.stats;
    let mut section = String::new();
    section.push_str(RULE);
    section.push_str(&format!(
        "Files: {} ({} failed)   Lines: {}\n",
        stats.file_count, stats.failed_files, stats.total_lines
    ));
    section.push_str(&format!(
        "Events: {} parsed, {} retained, {} dropped\n",
        stats.total_events, stats.retained_events, stats.dropped_events
    ));
    if let (Some(first), Some(last)) = (stats.first_timestamp, stats.last_timestamp) {
        section.push_str(&format!(
            "Span: {} .. {}\n",
            first.format("%Y-%m-%d %H:%M:%S"),
            last.format("%Y-%m-%d %H:%M:%S")
        ));
    }

    let counts = [
        IssueSeverity::Critical,
        IssueSeverity::High,
        IssueSeverity::Medium,
        IssueSeverity::Low,
    ]
    .map(|s| format!("{} {s}", report.count_by_severity(s)));
    section.push_str(&format!("Issues: {}\n", counts.join(", ")));
    section.push_str(RULE);
    section
}

fn format_categories(report: &AnalysisReport) -> String {
    let categories = &report.errors.categories;
    if categories.is_empty() {
        return String::new();
    }

    let mut section = String::from("\nTOP ERROR CATEGORIES\n");
    for category in categories.iter().take(SUMMARY_CATEGORIES) {
        section.push_str(&format!(
            "  {:<22} {:>8}  sev {}  pods {}\n",
            category.name,
            category.count,
            category.severity,
            category.pods.len()
        ));
    }
    if categories.len() > SUMMARY_CATEGORIES {
        section.push_str(&format!(
            "  ... and {} more\n",
            categories.len() - SUMMARY_CATEGORIES
        ));
    }
    section
}

fn format_infrastructure(report: &AnalysisReport) -> String {
    let metrics = &report.metrics;
    let database = &report.database;
    let mut section = String::new();

    if metrics.snapshot_count > 0 {
        section.push_str(&format!(
            "\nMETRICS: {} snapshots, {} scaling events, {} node alerts, {} hot pods\n",
            metrics.snapshot_count,
            metrics.scaling_events.len(),
            metrics.node_alerts.len(),
            metrics.hot_pods.len()
        ));
    }

    if database.pool.snapshots > 0 {
        section.push_str(&format!(
            "DATABASE: peak {} connections ({} active), {} long-running queries\n",
            database.pool.peak_total,
            database.pool.peak_active,
            database.long_queries.len()
        ));
        if let Some(peak) = database.pool.peak_utilization_percent {
            section.push_str(&format!("          peak utilization {peak:.1}%\n"));
        }
    }

    if !report.pod_logs.is_empty() {
        let lines: u64 = report.pod_logs.iter().map(|p| p.total_lines).sum();
        section.push_str(&format!(
            "POD LOGS: {} pods, {lines} lines\n",
            report.pod_logs.len()
        ));
    }
    section
}

fn format_issues(issues: &[Issue]) -> String {
    let mut section = String::from("\nISSUES\n");
    section.push_str(RULE);

    for (i, issue) in issues.iter().enumerate() {
        section.push_str(&format!("\n[{}] {}: {}\n", i + 1, issue.severity, issue.title));
        section.push_str(&format!("   {}\n", issue.description));
        for evidence in &issue.evidence {
            section.push_str(&format!("   • {}\n", truncate_chars(evidence, 120)));
        }
        if !issue.affected_services.is_empty() {
            section.push_str(&format!("   Affected: {}\n", issue.affected_services.join(", ")));
        }
        if !issue.recommended_action.is_empty() {
            section.push_str(&format!("   Action: {}\n", issue.recommended_action));
        }
    }
    section
}

fn format_recommendations(recommendations: &[Recommendation]) -> String {
    let mut section = String::from("\nRECOMMENDATIONS\n");
    section.push_str(RULE);
    for rec in recommendations {
        section.push_str(&format!(
            "  [{:>3}] {} ({:?}, effort {:?}, impact {:?})\n        {}\n",
            rec.priority, rec.title, rec.category, rec.effort, rec.impact, rec.action
        ));
    }
    section
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recommend::RecommendationEngine;
    use crate::types::RunStats;

    fn sample_report() -> AnalysisReport {
        let issues = vec![
            Issue::new(
                "redis-connection",
                IssueSeverity::Critical,
                "Redis connection failures",
                "812 events classified as redis_connection across 3 pods.",
            )
            .with_evidence("812 redis_connection events (threshold > 50)")
            .with_affected_services(vec!["api".to_string()])
            .with_action("Check Redis pod health."),
            Issue::new("tensorflow-warning", IssueSeverity::Low, "TensorFlow runtime warnings", "2 events"),
        ];
        let recommendations = RecommendationEngine::new().generate(&issues);
        AnalysisReport {
            stats: RunStats {
                total_lines: 1200,
                total_events: 900,
                retained_events: 900,
                file_count: 3,
                failed_files: 1,
                ..RunStats::default()
            },
            issues,
            recommendations,
            ..AnalysisReport::default()
        }
    }

    mod summary_tests {
        use super::*;

        #[test]
        fn empty_report() {
            let output = format_summary(&AnalysisReport::default());
            assert!(output.contains("INCIDENT ANALYSIS"));
            assert!(output.contains("No issues detected"));
            assert!(!output.contains("RECOMMENDATIONS"));
            assert!(!output.contains("Window:"));
        }

        #[test]
        fn issues_and_counts() {
            let output = format_summary(&sample_report());
            assert!(output.contains("Files: 3 (1 failed)"));
            assert!(output.contains("Issues: 1 CRITICAL, 0 HIGH, 0 MEDIUM, 1 LOW"));
            assert!(output.contains("[1] CRITICAL: Redis connection failures"));
            assert!(output.contains("Affected: api"));
            assert!(output.contains("Action: Check Redis pod health."));
            assert!(output.contains("[100] Redis connection failures"));
        }
    }

    mod json_tests {
        use super::*;

        #[test]
        fn pretty_json_has_sections() {
            let json = format_as_json(&sample_report()).unwrap();
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["stats"]["total_lines"], 1200);
            assert_eq!(value["issues"][0]["severity"], "critical");
            assert_eq!(value["recommendations"][0]["category"], "infrastructure");
            assert!(value["errors"]["categories"].is_array());
            assert!(value["database"]["long_queries"].is_array());
        }

        #[test]
        fn compact_json_is_one_line() {
            let json = format_as_json_compact(&sample_report()).unwrap();
            assert!(!json.contains('\n'));
        }
    }
}
