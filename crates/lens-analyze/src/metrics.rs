//! Time-series analysis over cluster-metrics snapshots.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use lens_ingest::{DbPoolSummary, MetricSnapshot, PoolConfig, deployment_from_pod};
use serde::Serialize;
use tracing::debug;

/// Node usage above this percentage raises an alert.
pub const NODE_ALERT_PERCENT: f64 = 80.0;

/// Entries in the hot-pods list.
pub const HOT_POD_LIMIT: usize = 10;

/// One node reading in a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodePoint {
    /// Snapshot time.
    pub timestamp: Option<DateTime<Utc>>,
    /// CPU in millicores.
    pub cpu_millicores: Option<f64>,
    /// CPU percentage.
    pub cpu_percent: Option<f64>,
    /// Memory in MiB.
    pub memory_mi: Option<f64>,
    /// Memory percentage.
    pub memory_percent: Option<f64>,
}

/// Readings of one node across snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSeries {
    /// Node name.
    pub node: String,
    /// Points in snapshot order.
    pub points: Vec<NodePoint>,
}

/// Summed pod usage of one deployment in one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentPoint {
    /// Snapshot time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Pods observed.
    pub pods: u32,
    /// Summed CPU in millicores.
    pub cpu_millicores: f64,
    /// Summed memory in MiB.
    pub memory_mi: f64,
}

/// Pod usage of one deployment across snapshots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentSeries {
    /// Deployment name.
    pub deployment: String,
    /// Points in snapshot order.
    pub points: Vec<DeploymentPoint>,
}

/// Direction of a replica change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDirection {
    /// More replicas desired.
    Up,
    /// Fewer replicas desired.
    Down,
}

/// A change in desired replicas between adjacent observations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScalingEvent {
    /// Deployment name.
    pub deployment: String,
    /// Snapshot where the new count was first seen.
    pub timestamp: Option<DateTime<Utc>>,
    /// Previous desired replicas.
    pub from: u32,
    /// New desired replicas.
    pub to: u32,
    /// Up or down.
    pub direction: ScaleDirection,
}

/// A pod ranked by peak CPU.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HotPod {
    /// Pod name.
    pub pod: String,
    /// Derived deployment.
    pub deployment: String,
    /// Highest CPU seen, in millicores.
    pub max_cpu_millicores: f64,
    /// Highest memory seen, in MiB.
    pub max_memory_mi: Option<f64>,
    /// Snapshot of the CPU peak.
    pub peak_at: Option<DateTime<Utc>>,
}

/// Resource a node alert refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeResource {
    /// CPU percentage.
    Cpu,
    /// Memory percentage.
    Memory,
}

/// A node reading above [`NODE_ALERT_PERCENT`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeAlert {
    /// Node name.
    pub node: String,
    /// Snapshot time.
    pub timestamp: Option<DateTime<Utc>>,
    /// CPU or memory.
    pub resource: NodeResource,
    /// Observed percentage.
    pub percent: f64,
}

/// Database pool summary at one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolPoint {
    /// Snapshot time.
    pub timestamp: Option<DateTime<Utc>>,
    /// Open connections.
    pub total: u32,
    /// Busy connections.
    pub active: u32,
    /// Idle connections.
    pub idle: u32,
    /// Server limit.
    pub max_connections: Option<u32>,
    /// `total / max_connections` as a percentage.
    pub utilization_percent: Option<f64>,
}

/// Finished metrics analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsAnalysis {
    /// Snapshots analyzed.
    pub snapshot_count: usize,
    /// Per-node series.
    pub nodes: Vec<NodeSeries>,
    /// Per-deployment pod series.
    pub deployments: Vec<DeploymentSeries>,
    /// Replica changes in chronological order.
    pub scaling_events: Vec<ScalingEvent>,
    /// Pods with the highest peak CPU.
    pub hot_pods: Vec<HotPod>,
    /// Node readings above the alert threshold.
    pub node_alerts: Vec<NodeAlert>,
    /// Pod status counts from the latest snapshot that listed any.
    pub latest_pod_status: BTreeMap<String, u32>,
    /// Pool summary over time.
    pub pool_series: Vec<PoolPoint>,
    /// Pool summary from the latest snapshot that had one.
    pub latest_pool: Option<DbPoolSummary>,
    /// Pool configuration from the latest snapshot that listed any.
    pub pool_config: Vec<PoolConfig>,
}

/// Builds series, scaling events and alerts from snapshots.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsAnalyzer;

impl MetricsAnalyzer {
    /// Creates an analyzer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Analyzes snapshots; they are visited in timestamp order, undated last.
    #[must_use]
    pub fn analyze(&self, snapshots: &[MetricSnapshot]) -> MetricsAnalysis {
        let mut ordered: Vec<&MetricSnapshot> = snapshots.iter().collect();
        ordered.sort_by_key(|s| (s.timestamp.is_none(), s.timestamp));

        let mut nodes: BTreeMap<String, Vec<NodePoint>> = BTreeMap::new();
        let mut deployments: BTreeMap<String, Vec<DeploymentPoint>> = BTreeMap::new();
        let mut hot: BTreeMap<String, HotPod> = BTreeMap::new();
        let mut last_desired: BTreeMap<String, u32> = BTreeMap::new();
        let mut analysis = MetricsAnalysis {
            snapshot_count: ordered.len(),
            ..MetricsAnalysis::default()
        };

        for snapshot in ordered {
            let ts = snapshot.timestamp;

            for node in &snapshot.nodes {
                nodes.entry(node.name.clone()).or_default().push(NodePoint {
                    timestamp: ts,
                    cpu_millicores: node.cpu_millicores,
                    cpu_percent: node.cpu_percent,
                    memory_mi: node.memory_mi,
                    memory_percent: node.memory_percent,
                });
                for (resource, value) in [
                    (NodeResource::Cpu, node.cpu_percent),
                    (NodeResource::Memory, node.memory_percent),
                ] {
                    if let Some(percent) = value.filter(|p| *p > NODE_ALERT_PERCENT) {
                        analysis.node_alerts.push(NodeAlert {
                            node: node.name.clone(),
                            timestamp: ts,
                            resource,
                            percent,
                        });
                    }
                }
            }

            let mut grouped: BTreeMap<String, DeploymentPoint> = BTreeMap::new();
            for pod in &snapshot.pods {
                let deployment = deployment_from_pod(&pod.name);
                let point = grouped.entry(deployment.clone()).or_insert(DeploymentPoint {
                    timestamp: ts,
                    pods: 0,
                    cpu_millicores: 0.0,
                    memory_mi: 0.0,
                });
                point.pods += 1;
                point.cpu_millicores += pod.cpu_millicores.unwrap_or(0.0);
                point.memory_mi += pod.memory_mi.unwrap_or(0.0);

                if let Some(cpu) = pod.cpu_millicores {
                    let entry = hot.entry(pod.name.clone()).or_insert_with(|| HotPod {
                        pod: pod.name.clone(),
                        deployment,
                        max_cpu_millicores: cpu,
                        max_memory_mi: None,
                        peak_at: ts,
                    });
                    if cpu > entry.max_cpu_millicores {
                        entry.max_cpu_millicores = cpu;
                        entry.peak_at = ts;
                    }
                    if let Some(mem) = pod.memory_mi {
                        entry.max_memory_mi = Some(entry.max_memory_mi.map_or(mem, |m| m.max(mem)));
                    }
                }
            }
            for (deployment, point) in grouped {
                deployments.entry(deployment).or_default().push(point);
            }

            for deployment in &snapshot.deployments {
                let Some(desired) = deployment.desired else {
                    continue;
                };
                if let Some(previous) = last_desired.insert(deployment.name.clone(), desired) {
                    if previous != desired {
                        analysis.scaling_events.push(ScalingEvent {
                            deployment: deployment.name.clone(),
                            timestamp: ts,
                            from: previous,
                            to: desired,
                            direction: if desired > previous {
                                ScaleDirection::Up
                            } else {
                                ScaleDirection::Down
                            },
                        });
                    }
                }
            }

            if !snapshot.pod_status.is_empty() {
                analysis.latest_pod_status.clone_from(&snapshot.pod_status);
            }
            if let Some(pool) = snapshot.db_pool {
                analysis.pool_series.push(PoolPoint {
                    timestamp: ts,
                    total: pool.total,
                    active: pool.active,
                    idle: pool.idle,
                    max_connections: pool.max_connections,
                    utilization_percent: pool.utilization_percent(),
                });
                analysis.latest_pool = Some(pool);
            }
            if !snapshot.pool_config.is_empty() {
                analysis.pool_config.clone_from(&snapshot.pool_config);
            }
        }

        analysis.nodes = nodes
            .into_iter()
            .map(|(node, points)| NodeSeries { node, points })
            .collect();
        analysis.deployments = deployments
            .into_iter()
            .map(|(deployment, points)| DeploymentSeries { deployment, points })
            .collect();

        let mut hot_pods: Vec<HotPod> = hot.into_values().collect();
        hot_pods.sort_by(|a, b| {
            b.max_cpu_millicores
                .total_cmp(&a.max_cpu_millicores)
                .then_with(|| a.pod.cmp(&b.pod))
        });
        hot_pods.truncate(HOT_POD_LIMIT);
        analysis.hot_pods = hot_pods;

        debug!(
            snapshots = analysis.snapshot_count,
            nodes = analysis.nodes.len(),
            scaling_events = analysis.scaling_events.len(),
            node_alerts = analysis.node_alerts.len(),
            "analyzed metrics snapshots"
        );
        analysis
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lens_ingest::SnapshotTextParser;

    fn snapshot(stamp: &str, body: &str) -> MetricSnapshot {
        SnapshotTextParser::new().parse_str("metrics.txt", &format!("Timestamp: {stamp}\n{body}"))
    }

    fn deployments(rows: &str) -> String {
        format!("--- DEPLOYMENTS ---\nNAME READY UP-TO-DATE AVAILABLE AGE\n{rows}")
    }

    mod scaling_tests {
        use super::*;

        #[test]
        fn desired_change_is_one_event() {
            let snaps = vec![
                snapshot("2024-01-15 10:00:00", &deployments("api 2/2 2 2 1d\n")),
                snapshot("2024-01-15 10:05:00", &deployments("api 2/4 4 2 1d\n")),
            ];
            let analysis = MetricsAnalyzer::new().analyze(&snaps);
            assert_eq!(analysis.scaling_events.len(), 1);
            let event = &analysis.scaling_events[0];
            assert_eq!((event.from, event.to), (2, 4));
            assert_eq!(event.direction, ScaleDirection::Up);
        }

        #[test]
        fn first_observation_never_an_event() {
            let snaps = vec![
                snapshot("2024-01-15 10:00:00", &deployments("api 2/2 2 2 1d\n")),
                snapshot("2024-01-15 10:05:00", &deployments("api 2/2 2 2 1d\nrasa 1/3 3 1 1d\n")),
            ];
            let analysis = MetricsAnalyzer::new().analyze(&snaps);
            assert!(analysis.scaling_events.is_empty());
        }

        #[test]
        fn snapshots_are_ordered_before_comparison() {
            let snaps = vec![
                snapshot("2024-01-15 10:05:00", &deployments("api 1/1 1 1 1d\n")),
                snapshot("2024-01-15 10:00:00", &deployments("api 3/3 3 3 1d\n")),
            ];
            let analysis = MetricsAnalyzer::new().analyze(&snaps);
            assert_eq!(analysis.scaling_events.len(), 1);
            assert_eq!(analysis.scaling_events[0].direction, ScaleDirection::Down);
            assert_eq!(analysis.scaling_events[0].from, 3);
        }
    }

    mod usage_tests {
        use super::*;

        const BODY: &str = "\
--- NODES ---
NAME CPU(cores) CPU% MEMORY(bytes) MEMORY%
node-a 1000m 50% 4Gi 81%
node-b 3900m 97% 2Gi 20%
--- PODS ---
NAME CPU(cores) MEMORY(bytes)
api-7d9f8c6b5-x2x4q 250m 512Mi
api-7d9f8c6b5-zz9k1 750m 256Mi
redis-0 100m 64Mi
--- POD STATUS ---
STATUS COUNT
Running 10
Pending 1
--- DB CONNECTION POOL ---
TOTAL ACTIVE IDLE MAX
120 30 90 150
";

        #[test]
        fn node_alerts_above_threshold() {
            let analysis = MetricsAnalyzer::new().analyze(&[snapshot("2024-01-15 10:00:00", BODY)]);
            assert_eq!(analysis.node_alerts.len(), 2);
            assert_eq!(analysis.node_alerts[0].node, "node-a");
            assert_eq!(analysis.node_alerts[0].resource, NodeResource::Memory);
            assert_eq!(analysis.node_alerts[1].resource, NodeResource::Cpu);
            assert_eq!(analysis.nodes.len(), 2);
        }

        #[test]
        fn pods_grouped_per_deployment() {
            let analysis = MetricsAnalyzer::new().analyze(&[snapshot("2024-01-15 10:00:00", BODY)]);
            let api = analysis
                .deployments
                .iter()
                .find(|d| d.deployment == "api")
                .unwrap();
            assert_eq!(api.points[0].pods, 2);
            assert!((api.points[0].cpu_millicores - 1000.0).abs() < f64::EPSILON);
            assert!((api.points[0].memory_mi - 768.0).abs() < f64::EPSILON);
        }

        #[test]
        fn hot_pods_sorted_by_peak_cpu() {
            let snaps = vec![
                snapshot("2024-01-15 10:00:00", BODY),
                snapshot(
                    "2024-01-15 10:05:00",
                    "--- PODS ---\nNAME CPU MEM\nredis-0 2000m 64Mi\n",
                ),
            ];
            let analysis = MetricsAnalyzer::new().analyze(&snaps);
            assert_eq!(analysis.hot_pods[0].pod, "redis-0");
            assert!((analysis.hot_pods[0].max_cpu_millicores - 2000.0).abs() < f64::EPSILON);
            assert_eq!(analysis.hot_pods[1].pod, "api-7d9f8c6b5-zz9k1");
        }

        #[test]
        fn latest_status_and_pool_series() {
            let analysis = MetricsAnalyzer::new().analyze(&[snapshot("2024-01-15 10:00:00", BODY)]);
            assert_eq!(analysis.latest_pod_status["Pending"], 1);
            assert_eq!(analysis.pool_series.len(), 1);
            let pct = analysis.pool_series[0].utilization_percent.unwrap();
            assert!((pct - 80.0).abs() < 1e-9);
            assert_eq!(analysis.latest_pool.unwrap().max_connections, Some(150));
        }

        #[test]
        fn empty_input_is_empty_analysis() {
            let analysis = MetricsAnalyzer::new().analyze(&[]);
            assert_eq!(analysis, MetricsAnalysis::default());
        }
    }
}
