//! End-to-end tests for the `incident-lens` binary.

use std::fmt::Write as _;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

fn archive(dir: &Path) {
    let mut log = String::new();
    for i in 0..60 {
        writeln!(
            log,
            "[api-7d9f8c6b5-x2x4q] 2024-01-15T10:00:{i:02}Z Error: connect ECONNREFUSED 10.0.0.5:6379"
        )
        .unwrap();
    }
    std::fs::write(dir.join("errors_20240115_100000.log"), log).unwrap();
    std::fs::write(dir.join("README.txt"), "not an input\n").unwrap();
}

fn lens() -> Command {
    let mut cmd = Command::cargo_bin("incident-lens").unwrap();
    cmd.env_remove("INCIDENT_LENS_MAX_EVENTS").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_missing_archive_exits_with_failure() {
    let dir = tempfile::tempdir().unwrap();
    lens()
        .arg(dir.path().join("does-not-exist"))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("archive directory not found"));
}

#[test]
fn test_json_report_on_stdout() {
    let dir = tempfile::tempdir().unwrap();
    archive(dir.path());

    let output = lens().arg(dir.path()).assert().success().get_output().stdout.clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(report["stats"]["total_events"], 60);
    assert_eq!(report["stats"]["file_count"], 1);
    assert_eq!(report["issues"][0]["id"], "redis-connection");
    assert_eq!(report["recommendations"][0]["priority"], 100);
}

#[test]
fn test_summary_format() {
    let dir = tempfile::tempdir().unwrap();
    archive(dir.path());

    lens()
        .arg(dir.path())
        .args(["--format", "summary"])
        .assert()
        .success()
        .stdout(predicate::str::contains("INCIDENT ANALYSIS"))
        .stdout(predicate::str::contains("Redis connection failures"));
}

#[test]
fn test_output_file_leaves_stdout_empty() {
    let dir = tempfile::tempdir().unwrap();
    archive(dir.path());
    let out = dir.path().join("out").join("report.json");
    std::fs::create_dir(dir.path().join("out")).unwrap();

    lens()
        .arg(dir.path())
        .arg("--output")
        .arg(&out)
        .assert()
        .success()
        .stdout(predicate::str::is_empty());

    let written = std::fs::read_to_string(&out).unwrap();
    assert!(written.contains("redis-connection"));
}

#[test]
fn test_max_events_from_environment() {
    let dir = tempfile::tempdir().unwrap();
    archive(dir.path());

    let output = lens()
        .arg(dir.path())
        .env("INCIDENT_LENS_MAX_EVENTS", "5")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(report["stats"]["retained_events"], 5);
    assert_eq!(report["stats"]["dropped_events"], 55);
    assert_eq!(report["events"].as_array().unwrap().len(), 5);
}

#[test]
fn test_invalid_start_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    lens()
        .arg(dir.path())
        .args(["--start", "last tuesday"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid argument"));
}

#[test]
fn test_time_window_filters_events() {
    let dir = tempfile::tempdir().unwrap();
    archive(dir.path());

    let output = lens()
        .arg(dir.path())
        .args(["--start", "2024-01-15T10:00:30Z"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let report: serde_json::Value = serde_json::from_slice(&output).unwrap();

    assert_eq!(report["stats"]["total_events"], 30);
    assert!(report["issues"].as_array().unwrap().is_empty());
}
