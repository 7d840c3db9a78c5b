// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-metric inputs at the head of the pipeline.
//!
//! Aggregated metrics are summed per label set for `bufferSeconds` before being dispatched.
//! Passthrough metrics go straight to the dispatcher.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::config::{MetricDefinition, MAX_INTERVAL_SECONDS};
use crate::error::AgentError;
use crate::persistence::Persistence;
use crate::report::MetricReport;
use crate::sender::Dispatcher;

const PERSISTENCE_PREFIX: &str = "aggregator/";

/// Reports collected since `create_time`, one per distinct label set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Bucket {
    create_time: DateTime<Utc>,
    reports: Vec<MetricReport>,
}

impl Bucket {
    fn new() -> Self {
        Self {
            create_time: Utc::now(),
            reports: Vec::new(),
        }
    }

    fn add(&mut self, report: MetricReport) {
        let existing = self
            .reports
            .iter_mut()
            .find(|r| r.name == report.name && r.labels == report.labels);
        match existing {
            Some(aggregated) => {
                aggregated.value.accumulate(&report.value);
                aggregated.start_time = aggregated.start_time.min(report.start_time);
                aggregated.end_time = aggregated.end_time.max(report.end_time);
            }
            None => self.reports.push(report),
        }
    }
}

#[derive(Debug)]
enum AggregatorCommand {
    Add(MetricReport, oneshot::Sender<Result<(), AgentError>>),
    Shutdown,
}

/// Handle to the aggregation task of one metric.
#[derive(Debug)]
pub struct Aggregator {
    metric: String,
    tx: mpsc::UnboundedSender<AggregatorCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Aggregator {
    /// Starts aggregating `metric`, resuming any bucket persisted by a previous run. Must be
    /// called within a tokio runtime.
    pub fn new(
        metric: &str,
        buffer: Duration,
        dispatcher: Arc<Dispatcher>,
        persistence: Arc<Persistence>,
    ) -> Result<Self, AgentError> {
        let max = Duration::from_secs(MAX_INTERVAL_SECONDS.unsigned_abs());
        if buffer.is_zero() || buffer > max {
            return Err(AgentError::Config(format!(
                "metric {metric}: aggregation.bufferSeconds must be > 0 and <= {MAX_INTERVAL_SECONDS}"
            )));
        }
        let persistence_name = format!("{PERSISTENCE_PREFIX}{metric}");
        let bucket: Bucket = persistence
            .load(&persistence_name)?
            .unwrap_or_else(Bucket::new);

        // A resumed bucket keeps its original push time.
        let age = (Utc::now() - bucket.create_time)
            .to_std()
            .unwrap_or_default();
        let deadline = Instant::now() + buffer.saturating_sub(age);

        let (tx, rx) = mpsc::unbounded_channel();
        let service = AggregatorService {
            metric: metric.to_string(),
            buffer,
            bucket,
            deadline,
            dispatcher,
            persistence,
            persistence_name,
            rx,
        };
        Ok(Self {
            metric: metric.to_string(),
            tx,
            task: Mutex::new(Some(tokio::spawn(service.run()))),
        })
    }

    /// Adds an already validated report to the current bucket.
    pub async fn add_report(&self, report: MetricReport) -> Result<(), AgentError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.tx
            .send(AggregatorCommand::Add(report, result_tx))
            .map_err(|_| AgentError::Closed("aggregator"))?;
        result_rx
            .await
            .map_err(|_| AgentError::Closed("aggregator"))?
    }

    /// Stops the task after pushing the current bucket downstream.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(AggregatorCommand::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Aggregator {} task failed: {e}", self.metric);
            }
        }
    }
}

struct AggregatorService {
    metric: String,
    buffer: Duration,
    bucket: Bucket,
    deadline: Instant,
    dispatcher: Arc<Dispatcher>,
    persistence: Arc<Persistence>,
    persistence_name: String,
    rx: mpsc::UnboundedReceiver<AggregatorCommand>,
}

impl AggregatorService {
    async fn run(mut self) {
        debug!("Aggregator {} started", self.metric);

        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(AggregatorCommand::Add(report, result_tx)) => {
                        self.bucket.add(report);
                        let result = self
                            .persistence
                            .store_async(&self.persistence_name, &self.bucket)
                            .await;
                        if result_tx.send(result).is_err() {
                            error!("Aggregator {}: add response receiver dropped", self.metric);
                        }
                    }
                    Some(AggregatorCommand::Shutdown) | None => break,
                },
                () = tokio::time::sleep_until(self.deadline) => self.push_bucket().await,
            }
        }

        self.push_bucket().await;
        debug!("Aggregator {} stopped", self.metric);
    }

    async fn push_bucket(&mut self) {
        let bucket = std::mem::replace(&mut self.bucket, Bucket::new());
        self.deadline = Instant::now() + self.buffer;

        match bucket.reports.len() {
            0 => {}
            1 => debug!("Aggregator {}: sending 1 report", self.metric),
            n => debug!("Aggregator {}: sending {n} reports", self.metric),
        }
        for report in bucket.reports {
            if let Err(e) = self.dispatcher.send(report).await {
                error!("Aggregator {}: error sending report: {e}", self.metric);
            }
        }

        if let Err(e) = self
            .persistence
            .store_async(&self.persistence_name, &self.bucket)
            .await
        {
            error!("Aggregator {}: unable to persist state: {e}", self.metric);
        }
    }
}

/// The entry point of one metric's pipeline.
#[derive(Debug)]
pub enum Input {
    Aggregate(Aggregator),
    Passthrough(Arc<Dispatcher>),
}

impl Input {
    /// Builds the input configured for `definition`, feeding `dispatcher`.
    pub fn new(
        definition: &MetricDefinition,
        dispatcher: Arc<Dispatcher>,
        persistence: Arc<Persistence>,
    ) -> Result<Self, AgentError> {
        match (&definition.aggregation, &definition.passthrough) {
            (Some(_), None) => {
                let buffer = definition.buffer().ok_or_else(|| {
                    AgentError::Config(format!(
                        "metric {}: aggregation.bufferSeconds must be > 0 and <= {MAX_INTERVAL_SECONDS}",
                        definition.name
                    ))
                })?;
                Ok(Input::Aggregate(Aggregator::new(
                    &definition.name,
                    buffer,
                    dispatcher,
                    persistence,
                )?))
            }
            (None, Some(_)) => Ok(Input::Passthrough(dispatcher)),
            _ => Err(AgentError::Config(format!(
                "metric {}: exactly one of aggregation or passthrough must be specified",
                definition.name
            ))),
        }
    }

    pub async fn add_report(&self, report: MetricReport) -> Result<(), AgentError> {
        match self {
            Input::Aggregate(aggregator) => aggregator.add_report(report).await,
            Input::Passthrough(dispatcher) => dispatcher.send(report).await,
        }
    }

    pub async fn shutdown(&self) {
        if let Input::Aggregate(aggregator) = self {
            aggregator.shutdown().await;
        }
    }
}
