// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::aggregator::Input;
use crate::config::{interval, HeartbeatConfig, MAX_INTERVAL_SECONDS};
use crate::error::AgentError;
use crate::report::MetricReport;

/// Periodically reports a fixed value covering each elapsed interval.
#[derive(Debug)]
pub struct Heartbeat {
    name: String,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Heartbeat {
    /// Starts emitting into `input`. Must be called within a tokio runtime.
    pub fn start(name: &str, config: &HeartbeatConfig, input: Arc<Input>) -> Result<Self, AgentError> {
        let interval = interval(config.interval_seconds).ok_or_else(|| {
            AgentError::Config(format!(
                "source {name}: heartbeat: intervalSeconds must be > 0 and <= {MAX_INTERVAL_SECONDS}"
            ))
        })?;
        let cancel = CancellationToken::new();

        // Reports start on a whole second so consecutive intervals line up.
        let now = Utc::now();
        let start = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);

        let task = tokio::spawn(run(
            name.to_string(),
            config.clone(),
            interval,
            start,
            input,
            cancel.clone(),
        ));
        Ok(Self {
            name: name.to_string(),
            cancel,
            task: Mutex::new(Some(task)),
        })
    }

    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Heartbeat {} task failed: {e}", self.name);
            }
        }
    }
}

async fn run(
    name: String,
    config: HeartbeatConfig,
    interval: Duration,
    mut start: DateTime<Utc>,
    input: Arc<Input>,
    cancel: CancellationToken,
) {
    debug!("Heartbeat {name} started");
    let step = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let end = start + step;
                let report = MetricReport {
                    name: config.metric.clone(),
                    start_time: start,
                    end_time: end,
                    labels: config.labels.clone(),
                    value: config.value,
                };
                if let Err(e) = input.add_report(report).await {
                    error!("Heartbeat {name}: error sending report: {e}");
                }
                start = end;
            }
        }
    }
    debug!("Heartbeat {name} stopped");
}
