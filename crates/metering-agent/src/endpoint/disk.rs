// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Endpoint that writes reports to a local directory.
//!
//! Each report becomes one file named `report_<RFC3339 write time>_<id prefix>.json`. A
//! background task removes files whose write time is older than the configured expiry.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::endpoint::Endpoint;
use crate::error::AgentError;
use crate::report::StampedMetricReport;

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);
const REPORT_PREFIX: &str = "report";
const REPORT_SUFFIX: &str = ".json";
const ID_PREFIX_LENGTH: usize = 5;

#[derive(Debug)]
pub struct DiskEndpoint {
    name: String,
    dir: PathBuf,
    cancel: CancellationToken,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

impl DiskEndpoint {
    /// Creates the endpoint and starts its cleanup task. An `expire_seconds` of zero keeps
    /// reports forever.
    pub fn new(name: &str, dir: impl AsRef<Path>, expire_seconds: i64) -> Self {
        let dir = dir.as_ref().to_path_buf();
        let cancel = CancellationToken::new();
        let cleanup_task = u64::try_from(expire_seconds)
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| {
                tokio::spawn(run_cleanup(
                    dir.clone(),
                    Duration::from_secs(secs),
                    cancel.clone(),
                ))
            });
        Self {
            name: name.to_string(),
            dir,
            cancel,
            cleanup_task: Mutex::new(cleanup_task),
        }
    }
}

#[async_trait]
impl Endpoint for DiskEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, report: &StampedMetricReport) -> Result<(), AgentError> {
        let body = serde_json::to_vec(report)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(report_name(report, Utc::now()));
        tokio::fs::write(&path, body).await?;
        debug!("Wrote report {} to {}", report.id, path.display());
        Ok(())
    }

    fn is_transient(&self, _error: &AgentError) -> bool {
        true
    }

    async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .cleanup_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Disk endpoint {} cleanup task failed: {e}", self.name);
            }
        }
    }
}

async fn run_cleanup(dir: PathBuf, expiration: Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                let Ok(expiration) = chrono::Duration::from_std(expiration) else {
                    break;
                };
                cleanup(&dir, Utc::now() - expiration).await;
            }
        }
    }
}

/// Removes report files written before `cutoff`. Files that do not look like reports are left
/// alone.
async fn cleanup(dir: &Path, cutoff: DateTime<Utc>) {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if is_expired(name, cutoff) {
            if let Err(e) = tokio::fs::remove_file(entry.path()).await {
                warn!("Error removing expired disk report {name}: {e}");
            }
        }
    }
}

fn report_name(report: &StampedMetricReport, written: DateTime<Utc>) -> String {
    let id: String = report.id.chars().take(ID_PREFIX_LENGTH).collect();
    format!(
        "{REPORT_PREFIX}_{}_{id}{REPORT_SUFFIX}",
        written.to_rfc3339_opts(SecondsFormat::Secs, true)
    )
}

fn is_expired(name: &str, cutoff: DateTime<Utc>) -> bool {
    let Some(stem) = name
        .strip_prefix(REPORT_PREFIX)
        .and_then(|n| n.strip_suffix(REPORT_SUFFIX))
    else {
        return false;
    };
    let parts: Vec<&str> = stem.split('_').collect();
    let [_, written, _] = parts.as_slice() else {
        return false;
    };
    DateTime::parse_from_rfc3339(written).is_ok_and(|t| t < cutoff)
}
