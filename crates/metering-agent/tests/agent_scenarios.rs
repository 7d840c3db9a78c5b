// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! End-to-end runs of the engine agent against a disk endpoint.

use std::path::Path;
use std::time::Duration;

use chrono::DateTime;
use metering_agent::Agent;

fn config(report_dir: &Path) -> String {
    format!(
        r"
metrics:
- name: int-metric
  type: int
  aggregation:
    bufferSeconds: 1
  endpoints:
  - name: on_disk
endpoints:
- name: on_disk
  disk:
    reportDir: {}
    expireSeconds: 3600
",
        report_dir.display()
    )
}

fn report() -> String {
    r#"{"name": "int-metric", "startTime": "2024-01-01T00:00:00Z", "endTime": "2024-01-01T00:00:01Z", "value": {"int64value": 25}}"#
        .to_string()
}

fn sum_reports(dir: &Path) -> i64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
        .map(|e| {
            let text = std::fs::read_to_string(e.path()).unwrap();
            let value: serde_json::Value = serde_json::from_str(&text).unwrap();
            value["value"]["int64Value"].as_i64().unwrap()
        })
        .sum()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reports_are_aggregated_and_delivered() {
    let state = tempfile::tempdir().unwrap();
    let reports = tempfile::tempdir().unwrap();
    let agent = Agent::start(&config(reports.path()), state.path().to_str().unwrap())
        .await
        .unwrap();

    for _ in 0..3 {
        agent.add_report_json(&report()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = agent.status();
    assert!(status.last_report_success > DateTime::UNIX_EPOCH);
    assert_eq!(status.current_failure_count, 0);
    assert_eq!(status.total_failure_count, 0);
    assert_eq!(sum_reports(reports.path()), 75);

    agent.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_agents_are_isolated() {
    let state1 = tempfile::tempdir().unwrap();
    let state2 = tempfile::tempdir().unwrap();
    let reports1 = tempfile::tempdir().unwrap();
    let reports2 = tempfile::tempdir().unwrap();
    let agent1 = Agent::start(&config(reports1.path()), state1.path().to_str().unwrap())
        .await
        .unwrap();
    let agent2 = Agent::start(&config(reports2.path()), state2.path().to_str().unwrap())
        .await
        .unwrap();

    for _ in 0..3 {
        agent1.add_report_json(&report()).await.unwrap();
    }
    for _ in 0..2 {
        agent2.add_report_json(&report()).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(sum_reports(reports1.path()), 75);
    assert_eq!(sum_reports(reports2.path()), 50);

    agent1.shutdown().await.unwrap();
    agent2.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_report_changes_nothing() {
    let reports = tempfile::tempdir().unwrap();
    let agent = Agent::start(&config(reports.path()), "").await.unwrap();

    assert!(agent.add_report_json("malformed_report").await.is_err());
    tokio::time::sleep(Duration::from_millis(1500)).await;

    let status = agent.status();
    assert_eq!(status.last_report_success, DateTime::UNIX_EPOCH);
    assert_eq!(status.current_failure_count, 0);
    assert_eq!(status.total_failure_count, 0);
    assert_eq!(sum_reports(reports.path()), 0);

    agent.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_flushes_pending_aggregate() {
    let reports = tempfile::tempdir().unwrap();
    let agent = Agent::start(&config(reports.path()), "").await.unwrap();

    agent.add_report_json(&report()).await.unwrap();
    agent.shutdown().await.unwrap();

    assert_eq!(sum_reports(reports.path()), 25);
}
