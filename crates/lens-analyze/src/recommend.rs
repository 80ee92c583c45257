//! Turns issues into prioritized recommendations.

use crate::types::{Estimate, Issue, IssueSeverity, Recommendation, RecommendationCategory};

/// Title keywords per category, checked in order.
const CATEGORY_KEYWORDS: &[(RecommendationCategory, &[&str])] = &[
    (
        RecommendationCategory::Infrastructure,
        &["redis", "mysql", "database", "node", "kafka", "dns", "network", "disk"],
    ),
    (
        RecommendationCategory::Configuration,
        &["pool", "config", "limit", "saturat", "auth", "setting"],
    ),
    (
        RecommendationCategory::MlModel,
        &["rasa", "nlu", "tensorflow", "model"],
    ),
    (
        RecommendationCategory::Resources,
        &["memory", "oom", "cpu", "scal"],
    ),
    (
        RecommendationCategory::Reliability,
        &["crash", "restart", "exception", "error", "5xx", "unhealthy", "lock", "timeout"],
    ),
];

/// Action keywords per effort level, checked in order.
const EFFORT_KEYWORDS: &[(Estimate, &[&str])] = &[
    (Estimate::Low, &["check", "verify", "review"]),
    (Estimate::Medium, &["update", "increase", "add"]),
    (Estimate::High, &["redesign", "migrate", "refactor"]),
];

/// Priority for a severity.
#[must_use]
pub const fn priority_for(severity: IssueSeverity) -> u8 {
    match severity {
        IssueSeverity::Critical => 100,
        IssueSeverity::High => 75,
        IssueSeverity::Medium => 50,
        IssueSeverity::Low => 25,
    }
}

/// Impact estimate for a severity.
#[must_use]
pub const fn impact_for(severity: IssueSeverity) -> Estimate {
    match severity {
        IssueSeverity::Critical | IssueSeverity::High => Estimate::High,
        IssueSeverity::Medium => Estimate::Medium,
        IssueSeverity::Low => Estimate::Low,
    }
}

/// Category from the first keyword found in a title.
#[must_use]
pub fn category_for(title: &str) -> RecommendationCategory {
    let title = title.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| title.contains(w)))
        .map_or(RecommendationCategory::General, |(category, _)| *category)
}

/// Effort from the first keyword found in an action.
#[must_use]
pub fn effort_for(action: &str) -> Estimate {
    let action = action.to_lowercase();
    EFFORT_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| action.contains(w)))
        .map_or(Estimate::Medium, |(effort, _)| *effort)
}

/// Derives one recommendation per issue.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecommendationEngine;

impl RecommendationEngine {
    /// Creates the engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Builds the recommendation for a single issue.
    #[must_use]
    pub fn recommend(&self, issue: &Issue) -> Recommendation {
        let rationale = if issue.root_cause.is_empty() {
            issue.description.clone()
        } else {
            issue.root_cause.clone()
        };
        Recommendation {
            issue_id: issue.id.clone(),
            title: issue.title.clone(),
            priority: priority_for(issue.severity),
            category: category_for(&issue.title),
            action: issue.recommended_action.clone(),
            rationale,
            effort: effort_for(&issue.recommended_action),
            impact: impact_for(issue.severity),
        }
    }

    /// Builds recommendations for every issue, highest priority first.
    #[must_use]
    pub fn generate(&self, issues: &[Issue]) -> Vec<Recommendation> {
        let mut recommendations: Vec<Recommendation> =
            issues.iter().map(|issue| self.recommend(issue)).collect();
        recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));
        recommendations
    }
}
