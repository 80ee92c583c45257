//! Rule-based issue detection.
//!
//! Each rule is an independent [`DetectionRule`] that inspects the combined
//! error, metrics and database analysis and emits zero or more [`Issue`]s.
//! Rules run in table order; the final list is stably sorted by severity.

use std::collections::BTreeMap;

use crate::aggregator::ErrorAnalysis;
use crate::db::DbAnalysis;
use crate::metrics::{MetricsAnalysis, NodeAlert, NodeResource, ScaleDirection};
use crate::types::{Issue, IssueSeverity};

/// Node usage above this percentage makes a node alert critical.
pub const NODE_CRITICAL_PERCENT: f64 = 95.0;

/// Long queries above this many seconds make the issue critical.
pub const CRITICAL_QUERY_SECONDS: u64 = 300;

/// Pool utilization at or above this percentage is saturation.
pub const POOL_SATURATION_PERCENT: f64 = 80.0;

/// Pod statuses that count as healthy.
pub const HEALTHY_STATUSES: &[&str] = &["Running", "Completed", "Succeeded"];

/// Everything a rule may look at.
#[derive(Debug, Clone, Copy)]
pub struct DetectionInput<'a> {
    /// Error-log rollups.
    pub errors: &'a ErrorAnalysis,
    /// Metrics analysis.
    pub metrics: &'a MetricsAnalysis,
    /// Database analysis.
    pub database: &'a DbAnalysis,
}

/// One entry in the rule table.
pub trait DetectionRule: Send + Sync {
    /// Rule identifier; emitted issue ids start with it.
    fn id(&self) -> &'static str;

    /// Evaluates the rule.
    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue>;
}

/// Count comparison used by category rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Threshold {
    /// Strictly greater than.
    Above(u64),
    /// Greater than or equal to.
    AtLeast(u64),
}

impl Threshold {
    /// Returns true if `count` satisfies the threshold.
    #[must_use]
    pub const fn is_met(&self, count: u64) -> bool {
        match *self {
            Self::Above(limit) => count > limit,
            Self::AtLeast(limit) => count >= limit,
        }
    }
}

impl std::fmt::Display for Threshold {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Above(limit) => write!(f, "> {limit}"),
            Self::AtLeast(limit) => write!(f, ">= {limit}"),
        }
    }
}

/// Fires when a taxonomy category's event count crosses a threshold.
#[derive(Debug, Clone, Copy)]
pub struct CategoryRule {
    /// Rule and issue id.
    pub id: &'static str,
    /// Taxonomy category counted.
    pub category: &'static str,
    /// Firing condition.
    pub threshold: Threshold,
    /// Issue severity.
    pub severity: IssueSeverity,
    /// Issue title.
    pub title: &'static str,
    /// Impact statement.
    pub impact: &'static str,
    /// Likely cause.
    pub root_cause: &'static str,
    /// Recommended action.
    pub action: &'static str,
}

impl DetectionRule for CategoryRule {
    fn id(&self) -> &'static str {
        self.id
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let Some(category) = input.errors.category(self.category) else {
            return Vec::new();
        };
        if !self.threshold.is_met(category.count) {
            return Vec::new();
        }

        let mut issue = Issue::new(
            self.id,
            self.severity,
            self.title,
            format!(
                "{} events classified as {} across {} pods.",
                category.count,
                self.category,
                category.pods.len()
            ),
        )
        .with_evidence(format!(
            "{} {} events (threshold {})",
            category.count, self.category, self.threshold
        ))
        .with_impact(self.impact)
        .with_affected_services(category.deployments.iter().cloned())
        .with_root_cause(self.root_cause)
        .with_action(self.action);

        if !category.bot_ids.is_empty() {
            issue = issue.with_evidence(format!("{} bots affected", category.bot_ids.len()));
        }
        if let Some(sample) = category.samples.first() {
            issue = issue.with_evidence(format!("Sample from {}: {}", sample.pod, sample.message));
        }
        vec![issue]
    }
}

/// The category rules in evaluation order.
pub const CATEGORY_RULES: &[CategoryRule] = &[
    CategoryRule {
        id: "redis-connection",
        category: "redis_connection",
        threshold: Threshold::Above(50),
        severity: IssueSeverity::Critical,
        title: "Redis connection failures",
        impact: "Sessions, locks and caches backed by Redis are unavailable to the affected services.",
        root_cause: "Redis is unreachable or refusing connections.",
        action: "Check Redis pod health and network reachability on port 6379, then verify client retry settings.",
    },
    CategoryRule {
        id: "rasa-timeout",
        category: "rasa_timeout",
        threshold: Threshold::Above(20),
        severity: IssueSeverity::Critical,
        title: "Rasa action server timeouts",
        impact: "Conversations stall or fall back while waiting on the action server.",
        root_cause: "The Rasa action server is overloaded or its downstream calls are slow.",
        action: "Increase the action server timeout and add replicas for the Rasa action server.",
    },
    CategoryRule {
        id: "mysql-error",
        category: "mysql_error",
        threshold: Threshold::Above(10),
        severity: IssueSeverity::Critical,
        title: "MySQL errors",
        impact: "Reads and writes fail for services that depend on the database.",
        root_cause: "The MySQL server rejected or dropped connections or statements.",
        action: "Review MySQL error codes and verify connection limits and credentials.",
    },
    CategoryRule {
        id: "oom-killed",
        category: "oom_killed",
        threshold: Threshold::AtLeast(1),
        severity: IssueSeverity::Critical,
        title: "Containers OOM killed",
        impact: "Killed containers drop in-flight requests and restart cold.",
        root_cause: "Container memory use exceeded its limit.",
        action: "Increase memory limits for the affected deployments or reduce per-worker memory use.",
    },
    CategoryRule {
        id: "crash-restart",
        category: "crash_restart",
        threshold: Threshold::AtLeast(5),
        severity: IssueSeverity::High,
        title: "Pods crash looping",
        impact: "Capacity drops while containers restart and back off.",
        root_cause: "Containers exit repeatedly after start.",
        action: "Review container exit codes and recent deploys for the crashing pods.",
    },
    CategoryRule {
        id: "memory-pressure",
        category: "memory_pressure",
        threshold: Threshold::AtLeast(1),
        severity: IssueSeverity::High,
        title: "Memory pressure evictions",
        impact: "The kubelet evicts pods to reclaim memory.",
        root_cause: "Scheduled memory requests do not reflect actual usage.",
        action: "Add node capacity or rebalance memory-heavy workloads across nodes.",
    },
    CategoryRule {
        id: "disk-pressure",
        category: "disk_pressure",
        threshold: Threshold::AtLeast(1),
        severity: IssueSeverity::High,
        title: "Disk pressure on nodes",
        impact: "Pods are evicted and writes fail when disks fill up.",
        root_cause: "Logs, images or volumes exhausted node disk space.",
        action: "Check node disk usage and rotate or prune logs and images.",
    },
    CategoryRule {
        id: "http-5xx",
        category: "http_5xx",
        threshold: Threshold::Above(100),
        severity: IssueSeverity::High,
        title: "Elevated HTTP 5xx responses",
        impact: "Clients receive server errors.",
        root_cause: "Upstream services fail or time out while handling requests.",
        action: "Review upstream error logs for the failing services and add circuit breaking.",
    },
    CategoryRule {
        id: "unhandled-exception",
        category: "unhandled_exception",
        threshold: Threshold::Above(10),
        severity: IssueSeverity::High,
        title: "Unhandled exceptions",
        impact: "Requests abort and workers may crash.",
        root_cause: "Error paths are not handled in application code.",
        action: "Refactor error handling around the failing code paths so exceptions are caught and logged.",
    },
    CategoryRule {
        id: "kafka-error",
        category: "kafka_error",
        threshold: Threshold::Above(10),
        severity: IssueSeverity::High,
        title: "Kafka errors",
        impact: "Messages are delayed or lost between producers and consumers.",
        root_cause: "Brokers are unavailable or partitions lost their leader.",
        action: "Verify broker health and topic leadership, and check consumer group lag.",
    },
    CategoryRule {
        id: "lock-failure",
        category: "lock_failure",
        threshold: Threshold::Above(10),
        severity: IssueSeverity::High,
        title: "Distributed lock failures",
        impact: "Concurrent work is rejected or runs twice.",
        root_cause: "Lock contention or deadlocks between workers.",
        action: "Redesign the locking scheme to shorten critical sections and add lock timeouts.",
    },
    CategoryRule {
        id: "dns-error",
        category: "dns_error",
        threshold: Threshold::Above(5),
        severity: IssueSeverity::High,
        title: "DNS resolution failures",
        impact: "Services cannot reach their dependencies by name.",
        root_cause: "Cluster DNS is overloaded or service names are wrong.",
        action: "Check CoreDNS health and the service names used by the failing pods.",
    },
    CategoryRule {
        id: "timeout",
        category: "timeout_generic",
        threshold: Threshold::Above(100),
        severity: IssueSeverity::Medium,
        title: "Widespread request timeouts",
        impact: "Requests fail slowly, tying up workers.",
        root_cause: "A dependency is slow or unreachable.",
        action: "Review slow dependencies and update client timeouts to match observed latency.",
    },
    CategoryRule {
        id: "connection-reset",
        category: "connection_reset",
        threshold: Threshold::Above(20),
        severity: IssueSeverity::Medium,
        title: "Network connection resets",
        impact: "In-flight requests are dropped mid-stream.",
        root_cause: "Idle connections are closed by a proxy or peer.",
        action: "Check load balancer idle timeouts and keep-alive settings between services.",
    },
    CategoryRule {
        id: "nlu-fallback",
        category: "nlu_fallback",
        threshold: Threshold::Above(100),
        severity: IssueSeverity::Medium,
        title: "High NLU fallback volume",
        impact: "Users receive fallback replies instead of answers.",
        root_cause: "The NLU model misses common intents.",
        action: "Review fallback conversations and add training examples for the missed intents.",
    },
    CategoryRule {
        id: "auth-error",
        category: "auth_error",
        threshold: Threshold::Above(20),
        severity: IssueSeverity::Medium,
        title: "Authentication failures",
        impact: "Calls between services or to providers are rejected.",
        root_cause: "Expired or misconfigured credentials.",
        action: "Verify tokens, API keys and service credentials used by the affected services.",
    },
    CategoryRule {
        id: "rate-limit",
        category: "rate_limit",
        threshold: Threshold::Above(20),
        severity: IssueSeverity::Medium,
        title: "Upstream rate limiting",
        impact: "Requests are throttled by a provider.",
        root_cause: "Request volume exceeds the provider quota.",
        action: "Add client-side backoff and increase quotas with the upstream provider.",
    },
    CategoryRule {
        id: "tensorflow-warning",
        category: "tensorflow_warning",
        threshold: Threshold::AtLeast(1),
        severity: IssueSeverity::Low,
        title: "TensorFlow runtime warnings",
        impact: "Model serving may run without hardware acceleration.",
        root_cause: "The TensorFlow build does not match the host libraries.",
        action: "Update the TensorFlow build or silence known-benign runtime warnings.",
    },
];

/// One issue per scaling event in the given direction.
#[derive(Debug, Clone, Copy)]
pub struct ScalingRule {
    direction: ScaleDirection,
}

impl ScalingRule {
    /// Creates the rule for one direction.
    #[must_use]
    pub const fn new(direction: ScaleDirection) -> Self {
        Self { direction }
    }
}

impl DetectionRule for ScalingRule {
    fn id(&self) -> &'static str {
        match self.direction {
            ScaleDirection::Up => "scale-up",
            ScaleDirection::Down => "scale-down",
        }
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let (severity, verb) = match self.direction {
            ScaleDirection::Up => (IssueSeverity::High, "up"),
            ScaleDirection::Down => (IssueSeverity::Low, "down"),
        };

        input
            .metrics
            .scaling_events
            .iter()
            .filter(|e| e.direction == self.direction)
            .enumerate()
            .map(|(n, event)| {
                let when = event
                    .timestamp
                    .map_or_else(|| "an undated snapshot".to_string(), |t| t.to_rfc3339());
                let issue = Issue::new(
                    format!("{}-{}-{}", self.id(), event.deployment, n + 1),
                    severity,
                    format!("Deployment {} scaled {verb}", event.deployment),
                    format!(
                        "Desired replicas for {} changed from {} to {} at {when}.",
                        event.deployment, event.from, event.to
                    ),
                )
                .with_evidence(format!("desired {} -> {}", event.from, event.to))
                .with_affected_services(vec![event.deployment.clone()]);

                match self.direction {
                    ScaleDirection::Up => issue
                        .with_impact("Load grew enough to trigger additional replicas.")
                        .with_root_cause("Autoscaler or operator reacted to increased demand.")
                        .with_action(
                            "Review the autoscaler trigger for this deployment and confirm the new replica count is sufficient.",
                        ),
                    ScaleDirection::Down => issue
                        .with_impact("Fewer replicas are serving traffic.")
                        .with_root_cause("Autoscaler or operator reduced capacity.")
                        .with_action(
                            "Verify the scale-down was intended and that remaining replicas handle peak load.",
                        ),
                }
            })
            .collect()
    }
}

/// One issue per node with readings above the alert threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeAlertRule;

impl DetectionRule for NodeAlertRule {
    fn id(&self) -> &'static str {
        "node-alert"
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let mut per_node: BTreeMap<&str, Vec<&NodeAlert>> = BTreeMap::new();
        for alert in &input.metrics.node_alerts {
            per_node.entry(alert.node.as_str()).or_default().push(alert);
        }

        per_node
            .into_iter()
            .map(|(node, alerts)| {
                let peak = alerts.iter().map(|a| a.percent).fold(0.0_f64, f64::max);
                let severity = if peak > NODE_CRITICAL_PERCENT {
                    IssueSeverity::Critical
                } else {
                    IssueSeverity::High
                };
                let evidence = alerts.iter().take(5).map(|a| {
                    let resource = match a.resource {
                        NodeResource::Cpu => "CPU",
                        NodeResource::Memory => "memory",
                    };
                    let when = a
                        .timestamp
                        .map_or_else(|| "undated".to_string(), |t| t.to_rfc3339());
                    format!("{resource} at {:.0}% ({when})", a.percent)
                });

                Issue::new(
                    format!("node-alert-{node}"),
                    severity,
                    format!("Node {node} under resource pressure"),
                    format!(
                        "{} readings above the alert threshold, peaking at {peak:.0}%.",
                        alerts.len()
                    ),
                )
                .with_evidence_list(evidence.collect::<Vec<_>>())
                .with_impact("Pods on this node are throttled or at risk of eviction.")
                .with_affected_services(vec![node.to_string()])
                .with_root_cause("Workloads on the node use more than its allocatable capacity.")
                .with_action("Add node capacity or move hot pods off this node.")
            })
            .collect()
    }
}

/// Fires when the latest status counts list pods outside healthy phases.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnhealthyPodsRule;

impl DetectionRule for UnhealthyPodsRule {
    fn id(&self) -> &'static str {
        "unhealthy-pods"
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let unhealthy: Vec<(&String, &u32)> = input
            .metrics
            .latest_pod_status
            .iter()
            .filter(|(status, count)| **count > 0 && !HEALTHY_STATUSES.contains(&status.as_str()))
            .collect();
        if unhealthy.is_empty() {
            return Vec::new();
        }

        let total: u32 = unhealthy.iter().map(|(_, c)| **c).sum();
        vec![
            Issue::new(
                self.id(),
                IssueSeverity::High,
                "Unhealthy pods",
                format!("{total} pods were not running in the latest snapshot."),
            )
            .with_evidence_list(unhealthy.iter().map(|(s, c)| format!("{s}: {c}")))
            .with_impact("Reduced capacity for the owning deployments.")
            .with_root_cause("Pods are pending, failing or restarting.")
            .with_action("Check events and logs of the pods that are not running."),
        ]
    }
}

/// Fires when any statement ran past the long-query threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct LongQueryRule;

impl DetectionRule for LongQueryRule {
    fn id(&self) -> &'static str {
        "long-running-queries"
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let queries = &input.database.long_queries;
        let Some(longest) = queries.iter().map(|q| q.elapsed_seconds).max() else {
            return Vec::new();
        };
        let severity = if longest > CRITICAL_QUERY_SECONDS {
            IssueSeverity::Critical
        } else {
            IssueSeverity::High
        };
        let mut databases: Vec<String> = queries.iter().filter_map(|q| q.database.clone()).collect();
        databases.sort();
        databases.dedup();

        let evidence = queries.iter().take(5).map(|q| {
            format!(
                "{}s on {}: {}",
                q.elapsed_seconds,
                q.database.as_deref().unwrap_or("(none)"),
                q.query.as_deref().unwrap_or("(no statement text)")
            )
        });

        vec![
            Issue::new(
                self.id(),
                severity,
                "Long-running database queries",
                format!(
                    "{} distinct statements ran longer than {}s; the longest ran {longest}s.",
                    queries.len(),
                    crate::db::LONG_QUERY_SECONDS
                ),
            )
            .with_evidence_list(evidence.collect::<Vec<_>>())
            .with_impact("Long statements hold connections and locks, starving other requests.")
            .with_affected_services(databases)
            .with_root_cause("Missing indexes or heavy reporting queries on the primary.")
            .with_action(
                "Review the slow statements, add missing indexes, and migrate heavy reports off the primary.",
            ),
        ]
    }
}

/// Fires when pool utilization peaks at or above the saturation threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolSaturationRule;

impl DetectionRule for PoolSaturationRule {
    fn id(&self) -> &'static str {
        "db-pool-saturation"
    }

    fn evaluate(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let from_processlist = input.database.pool.peak_utilization_percent;
        let from_snapshots = input
            .metrics
            .pool_series
            .iter()
            .filter_map(|p| p.utilization_percent)
            .reduce(f64::max);
        let peak = match (from_processlist, from_snapshots) {
            (Some(a), Some(b)) => a.max(b),
            (a, b) => match a.or(b) {
                Some(v) => v,
                None => return Vec::new(),
            },
        };
        if peak < POOL_SATURATION_PERCENT {
            return Vec::new();
        }

        let mut issue = Issue::new(
            self.id(),
            IssueSeverity::High,
            "Connection pool saturation",
            format!("Database connections peaked at {peak:.0}% of the server limit."),
        )
        .with_evidence(format!("peak utilization {peak:.1}%"))
        .with_impact("New connections are refused once the limit is reached.")
        .with_root_cause("Per-pod pool sizes multiplied by replicas exceed the server limit.")
        .with_action("Increase max_connections or reduce per-pod pool sizes.");

        if let Some(max) = input
            .database
            .pool
            .max_connections
            .or_else(|| input.metrics.latest_pool.and_then(|p| p.max_connections))
        {
            issue = issue.with_evidence(format!("max_connections {max}"));
        }
        for config in &input.metrics.pool_config {
            if let Some(per_pod) = config.max_connections_per_pod() {
                issue = issue.with_evidence(format!(
                    "{} may open up to {per_pod} connections per pod",
                    config.deployment
                ));
            }
        }
        vec![issue]
    }
}

/// The default rule table.
#[must_use]
pub fn default_rules() -> Vec<Box<dyn DetectionRule>> {
    let mut rules: Vec<Box<dyn DetectionRule>> = CATEGORY_RULES
        .iter()
        .map(|rule| Box::new(*rule) as Box<dyn DetectionRule>)
        .collect();
    rules.push(Box::new(ScalingRule::new(ScaleDirection::Up)));
    rules.push(Box::new(ScalingRule::new(ScaleDirection::Down)));
    rules.push(Box::new(NodeAlertRule));
    rules.push(Box::new(UnhealthyPodsRule));
    rules.push(Box::new(LongQueryRule));
    rules.push(Box::new(PoolSaturationRule));
    rules
}

/// Runs a rule table over an analysis.
pub struct IssueDetector {
    rules: Vec<Box<dyn DetectionRule>>,
}

impl Default for IssueDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IssueDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssueDetector")
            .field("rules", &self.rule_ids())
            .finish()
    }
}

impl IssueDetector {
    /// Creates a detector with [`default_rules`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: default_rules(),
        }
    }

    /// Creates a detector with an explicit rule table.
    #[must_use]
    pub fn with_rules(rules: Vec<Box<dyn DetectionRule>>) -> Self {
        Self { rules }
    }

    /// Ids of the configured rules, in evaluation order.
    #[must_use]
    pub fn rule_ids(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.id()).collect()
    }

    /// Evaluates every rule and ranks the issues by severity.
    #[must_use]
    pub fn detect(&self, input: &DetectionInput<'_>) -> Vec<Issue> {
        let mut issues: Vec<Issue> = self
            .rules
            .iter()
            .flat_map(|rule| rule.evaluate(input))
            .collect();
        issues.sort_by_key(|issue| issue.severity.rank());
        issues
    }
}
