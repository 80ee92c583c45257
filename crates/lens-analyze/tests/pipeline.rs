//! Integration tests: full pipeline runs over scratch archives.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use lens_analyze::{
    ArchiveInputs, IssueSeverity, Pipeline, PipelineConfig, format_as_json, format_summary,
};
use lens_ingest::TimeRange;

fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, contents).unwrap();
    path
}

fn redis_log(pod: &str, minute: u32, count: usize) -> String {
    let mut log = String::new();
    for i in 0..count {
        writeln!(
            log,
            "[{pod}] 2024-01-15T10:{minute:02}:{:02}Z Error: connect ECONNREFUSED 10.0.0.5:6379",
            i % 60
        )
        .unwrap();
    }
    log
}

fn snapshot(time: &str, replicas: u32, node_b_cpu: u32) -> String {
    format!(
        "\
=== Cluster Metrics Snapshot ===
Timestamp: 2024-01-15 {time}

--- NODES ---
NAME      CPU(cores)   CPU%   MEMORY(bytes)   MEMORY%
node-a    1250m        31%    6144Mi          40%
node-b    3900m        {node_b_cpu}%    8Gi            50%

--- DEPLOYMENTS ---
NAME     READY   UP-TO-DATE   AVAILABLE   AGE
api      {replicas}/{replicas}     {replicas}            {replicas}           5d

--- POD STATUS ---
STATUS             COUNT
Running            40
CrashLoopBackOff   2

--- DB CONNECTION POOL ---
TOTAL   ACTIVE   IDLE   MAX
85      20       65     150
"
    )
}

const PROCESSLIST: &str = "\
Mon Jan 15 10:00:00 UTC 2024
1\tapp\t10.0.0.7:5123\tshop\tQuery\t400\tSending data\tSELECT * FROM orders
2\tapp\t10.0.0.8:5124\tshop\tSleep\t900\t\tNULL
3\tevent_scheduler\tlocalhost\tNULL\tDaemon\t99999\tWaiting on empty queue\tNULL
";

fn full_archive(dir: &Path) -> ArchiveInputs {
    ArchiveInputs {
        error_logs: vec![
            write(dir, "errors_20240115_100000.log", &redis_log("api-7d9f8c6b5-x2x4q", 0, 40)),
            write(dir, "errors_20240115_100500.log", &redis_log("api-7d9f8c6b5-p9k2m", 5, 30)),
        ],
        metrics: vec![
            write(dir, "metrics_20240115_100000.txt", &snapshot("10:00:00", 2, 50)),
            write(dir, "metrics_20240115_100500.txt", &snapshot("10:05:00", 4, 97)),
        ],
        db_debug: Some(write(dir, "db_debug_20240115.log", PROCESSLIST)),
        pod_logs: vec![write(
            dir,
            "pod-logs/api-7d9f8c6b5-x2x4q.log",
            "2024-01-15T10:00:00.000000000Z INFO started\n2024-01-15T10:00:01.000000000Z ERROR redis ECONNREFUSED\n",
        )],
    }
}

#[tokio::test]
async fn test_full_archive_detects_correlated_issues() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = full_archive(dir.path());

    let report = Pipeline::new(PipelineConfig::default()).run(&inputs).await;

    assert_eq!(report.stats.file_count, 6);
    assert_eq!(report.stats.failed_files, 0);
    assert_eq!(report.stats.total_events, 70);
    assert_eq!(report.stats.retained_events, 70);
    assert_eq!(report.stats.dropped_events, 0);
    assert_eq!(report.errors.count("redis_connection"), 70);
    assert_eq!(report.pod_logs.len(), 1);
    assert_eq!(report.pod_logs[0].pod, "api-7d9f8c6b5-x2x4q");

    let ids: Vec<&str> = report.issues.iter().map(|i| i.id.as_str()).collect();
    for expected in [
        "redis-connection",
        "scale-up-api-1",
        "node-alert-node-b",
        "unhealthy-pods",
        "long-running-queries",
    ] {
        assert!(ids.contains(&expected), "missing {expected} in {ids:?}");
    }
    assert!(!ids.contains(&"db-pool-saturation"));

    let ranks: Vec<u8> = report.issues.iter().map(|i| i.severity.rank()).collect();
    assert!(ranks.windows(2).all(|w| w[0] <= w[1]));
    assert!(report.has_critical_issues());

    assert_eq!(report.recommendations.len(), report.issues.len());
    assert_eq!(report.recommendations[0].priority, 100);
    assert!(
        report
            .recommendations
            .windows(2)
            .all(|w| w[0].priority >= w[1].priority)
    );

    let long = &report.database.long_queries;
    assert_eq!(long.len(), 1);
    assert_eq!(long[0].elapsed_seconds, 400);
    assert_eq!(report.database.pool.max_connections, Some(150));
}

#[tokio::test]
async fn test_event_cap_limits_report_but_not_counts() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = ArchiveInputs {
        error_logs: vec![
            write(dir.path(), "errors_20240115_100000.log", &redis_log("api-0", 0, 30)),
            write(dir.path(), "errors_20240115_101000.log", &redis_log("api-1", 10, 30)),
        ],
        ..ArchiveInputs::default()
    };

    let config = PipelineConfig::default().with_max_events(20);
    let report = Pipeline::new(config).run(&inputs).await;

    assert_eq!(report.stats.total_events, 60);
    assert_eq!(report.stats.retained_events, 20);
    assert_eq!(report.stats.dropped_events, 40);
    assert_eq!(report.events.len(), 20);
    assert_eq!(report.errors.count("redis_connection"), 60);
    assert!(
        report
            .events
            .windows(2)
            .all(|w| w[0].timestamp <= w[1].timestamp)
    );
}

#[tokio::test]
async fn test_time_range_excludes_records_and_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = full_archive(dir.path());
    let start = Utc.with_ymd_and_hms(2024, 1, 15, 10, 4, 0).unwrap();
    let range = TimeRange::new(Some(start), None).unwrap();

    let report = Pipeline::new(PipelineConfig::default().with_time_range(range))
        .run(&inputs)
        .await;

    assert_eq!(report.stats.total_events, 30);
    assert_eq!(report.metrics.snapshot_count, 1);
    assert!(report.metrics.scaling_events.is_empty());
    assert_eq!(report.database.pool.snapshots, 0);
    assert!(report.stats.first_timestamp.is_some_and(|t| t >= start));
}

#[tokio::test]
async fn test_unreadable_inputs_degrade_to_empty_sections() {
    let dir = tempfile::tempdir().unwrap();
    let inputs = ArchiveInputs {
        error_logs: vec![
            write(dir.path(), "errors_20240115_100000.log", &redis_log("api-0", 0, 3)),
            dir.path().join("errors_20240115_110000.log"),
        ],
        metrics: vec![dir.path().join("metrics_20240115_100000.txt")],
        ..ArchiveInputs::default()
    };

    let report = Pipeline::new(PipelineConfig::default()).run(&inputs).await;

    assert_eq!(report.stats.failed_files, 2);
    assert_eq!(report.stats.total_events, 3);
    assert_eq!(report.metrics.snapshot_count, 0);
    assert_eq!(report.count_by_severity(IssueSeverity::Critical), 0);
}

#[tokio::test]
async fn test_report_renders_as_json_and_summary() {
    let dir = tempfile::tempdir().unwrap();
    let report = Pipeline::new(PipelineConfig::default())
        .run(&full_archive(dir.path()))
        .await;

    let json = format_as_json(&report).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["stats"]["total_events"], 70);
    assert_eq!(value["issues"][0]["severity"], "critical");
    assert_eq!(value["metrics"]["scaling_events"][0]["from"], 2);
    assert_eq!(value["metrics"]["scaling_events"][0]["to"], 4);

    let summary = format_summary(&report);
    assert!(summary.contains("Redis connection failures"));
    assert!(summary.contains("RECOMMENDATIONS"));
    assert!(summary.contains("POD LOGS: 1 pods"));
}
