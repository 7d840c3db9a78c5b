// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Report dispatch and retrying delivery.
//!
//! A [`Dispatcher`] fans each finished report out to the [`RetryingSender`] of every endpoint
//! configured for the metric. Each sender owns a persistent FIFO queue and a task that drains it,
//! backing off exponentially while its endpoint reports transient failures.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::endpoint::Endpoint;
use crate::error::AgentError;
use crate::persistence::Persistence;
use crate::report::{MetricReport, StampedMetricReport};
use crate::stats::StatsRecorder;

const PERSISTENCE_PREFIX: &str = "epqueue/";

/// Backoff bounds and queue lifetime for a [`RetryingSender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Entries older than this are dropped after their next failed attempt.
    pub max_queue_time: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_queue_time: Duration::from_secs(3 * 60 * 60),
        }
    }
}

impl RetryPolicy {
    fn next_delay(&self, current: Duration) -> Duration {
        (current * 2).clamp(self.min_delay, self.max_delay)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueEntry {
    send_time: DateTime<Utc>,
    report: StampedMetricReport,
}

#[derive(Debug)]
enum SenderCommand {
    Send(StampedMetricReport, oneshot::Sender<Result<(), AgentError>>),
    Shutdown,
}

/// Handle to the delivery task of one endpoint.
#[derive(Debug)]
pub struct RetryingSender {
    name: String,
    endpoint: Arc<dyn Endpoint>,
    tx: mpsc::UnboundedSender<SenderCommand>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RetryingSender {
    /// Starts the delivery task. Reports left in the persisted queue by a previous run are sent
    /// first. Must be called within a tokio runtime.
    pub fn new(
        endpoint: Arc<dyn Endpoint>,
        persistence: Arc<Persistence>,
        stats: Arc<StatsRecorder>,
        policy: RetryPolicy,
    ) -> Result<Self, AgentError> {
        let name = endpoint.name().to_string();
        let queue: VecDeque<QueueEntry> = persistence
            .load(&persistence_name(&name))?
            .unwrap_or_default();
        if !queue.is_empty() {
            debug!("Sender {name} loaded {} queued reports", queue.len());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let service = SenderService {
            endpoint: Arc::clone(&endpoint),
            persistence,
            stats,
            policy,
            queue,
            rx,
            delay: Duration::ZERO,
            last_attempt: Instant::now(),
        };
        Ok(Self {
            name,
            endpoint,
            tx,
            task: Mutex::new(Some(tokio::spawn(service.run()))),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queues `report` for delivery. Returns once the report is persisted, not once it is
    /// delivered.
    pub async fn send(&self, report: StampedMetricReport) -> Result<(), AgentError> {
        let (result_tx, result_rx) = oneshot::channel();
        self.tx
            .send(SenderCommand::Send(report, result_tx))
            .map_err(|_| AgentError::Closed("sender"))?;
        result_rx.await.map_err(|_| AgentError::Closed("sender"))?
    }

    /// Stops the delivery task and the endpoint. Undelivered reports stay in the persisted queue.
    pub async fn shutdown(&self) {
        // The task may already be gone; the join below covers both cases.
        let _ = self.tx.send(SenderCommand::Shutdown);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Sender {} task failed: {e}", self.name);
            }
            self.endpoint.shutdown().await;
        }
    }
}

struct SenderService {
    endpoint: Arc<dyn Endpoint>,
    persistence: Arc<Persistence>,
    stats: Arc<StatsRecorder>,
    policy: RetryPolicy,
    queue: VecDeque<QueueEntry>,
    rx: mpsc::UnboundedReceiver<SenderCommand>,
    /// Zero while no retry is pending.
    delay: Duration,
    last_attempt: Instant,
}

impl SenderService {
    async fn run(mut self) {
        debug!("Sender {} started", self.endpoint.name());
        self.maybe_send().await;

        loop {
            let retry_at = (!self.delay.is_zero()).then(|| self.last_attempt + self.delay);
            let retry = async move {
                match retry_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(SenderCommand::Send(report, result_tx)) => {
                        let result = self.enqueue(report).await;
                        if result_tx.send(result).is_err() {
                            warn!("Sender {}: caller went away before enqueue completed", self.endpoint.name());
                        }
                        self.maybe_send().await;
                    }
                    Some(SenderCommand::Shutdown) | None => break,
                },
                () = retry => self.maybe_send().await,
            }
        }

        debug!("Sender {} stopped", self.endpoint.name());
    }

    async fn enqueue(&mut self, report: StampedMetricReport) -> Result<(), AgentError> {
        self.queue.push_back(QueueEntry {
            send_time: Utc::now(),
            report,
        });
        self.persist().await
    }

    async fn persist(&self) -> Result<(), AgentError> {
        let name = persistence_name(self.endpoint.name());
        if self.queue.is_empty() {
            self.persistence.remove_async(&name).await
        } else {
            self.persistence.store_async(&name, &self.queue).await
        }
    }

    /// Drains the queue until it is empty or a transient failure schedules a retry.
    async fn maybe_send(&mut self) {
        let now = Instant::now();
        if !self.delay.is_zero() && now < self.last_attempt + self.delay {
            return;
        }

        while let Some(entry) = self.queue.front().cloned() {
            let endpoint = self.endpoint.name().to_string();
            match self.endpoint.send(&entry.report).await {
                Ok(()) => self.stats.send_succeeded(&entry.report.id, &endpoint),
                Err(e) => {
                    let queued_for = (Utc::now() - entry.send_time).to_std().unwrap_or_default();
                    let expired = queued_for >= self.policy.max_queue_time;
                    if !expired && self.endpoint.is_transient(&e) {
                        self.last_attempt = now;
                        self.delay = self.policy.next_delay(self.delay);
                        warn!("Sender {endpoint}: {e} (will retry in {:?})", self.delay);
                        return;
                    }
                    if expired {
                        error!("Sender {endpoint}: {e} (retry expired)");
                    } else {
                        error!("Sender {endpoint}: {e}");
                    }
                    self.stats.send_failed(&entry.report.id, &endpoint);
                }
            }

            // Delivered or permanently failed: either way the entry leaves the queue.
            self.queue.pop_front();
            if let Err(e) = self.persist().await {
                error!("Sender {endpoint}: unable to persist queue: {e}");
            }
            self.last_attempt = now;
            self.delay = Duration::ZERO;
        }
    }
}

fn persistence_name(endpoint: &str) -> String {
    format!("{PERSISTENCE_PREFIX}{endpoint}")
}

/// Sends finished reports of one metric to each of its endpoints.
#[derive(Debug)]
pub struct Dispatcher {
    senders: Vec<Arc<RetryingSender>>,
    stats: Arc<StatsRecorder>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(senders: Vec<Arc<RetryingSender>>, stats: Arc<StatsRecorder>) -> Self {
        Self { senders, stats }
    }

    #[must_use]
    pub fn endpoints(&self) -> Vec<&str> {
        self.senders.iter().map(|s| s.name()).collect()
    }

    /// Stamps `report` with a fresh id, registers it with the stats recorder, and queues it on
    /// every sender.
    pub async fn send(&self, report: MetricReport) -> Result<(), AgentError> {
        let stamped = StampedMetricReport::new(report);
        self.stats.register(&stamped.id, self.endpoints().as_slice());

        let mut errors = Vec::new();
        for sender in &self.senders {
            if let Err(e) = sender.send(stamped.clone()).await {
                errors.push(format!("{}: {e}", sender.name()));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(AgentError::Runtime(errors.join("; ")))
        }
    }
}
