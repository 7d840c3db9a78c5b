// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The running agent: one pipeline per configured metric, feeding shared per-endpoint senders.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::aggregator::Input;
use crate::config::Config;
use crate::endpoint;
use crate::error::AgentError;
use crate::heartbeat::Heartbeat;
use crate::persistence::Persistence;
use crate::report::MetricReport;
use crate::sender::{Dispatcher, RetryPolicy, RetryingSender};
use crate::stats::{Snapshot, StatsRecorder};

#[derive(Debug)]
pub struct Agent {
    config: Config,
    inputs: HashMap<String, Arc<Input>>,
    senders: Vec<Arc<RetryingSender>>,
    sources: Vec<Heartbeat>,
    stats: Arc<StatsRecorder>,
    shut_down: AtomicBool,
}

impl Agent {
    /// Validates `config_text` and starts the pipeline. State is kept under `state_dir`, or in
    /// memory when it is empty. Must be called within a tokio runtime.
    pub async fn start(config_text: &str, state_dir: &str) -> Result<Self, AgentError> {
        Self::launch(Config::parse_and_validate(config_text)?, state_dir).await
    }

    /// Like [`Agent::start`], for a configuration that was parsed elsewhere, such as by
    /// [`Config::load`].
    pub async fn start_with_config(config: Config, state_dir: &str) -> Result<Self, AgentError> {
        config.validate()?;
        Self::launch(config, state_dir).await
    }

    async fn launch(config: Config, state_dir: &str) -> Result<Self, AgentError> {
        let persistence = Arc::new(Persistence::for_state_dir(state_dir)?);
        let stats = Arc::new(StatsRecorder::new());

        let mut senders_by_name = HashMap::new();
        for endpoint_config in &config.endpoints {
            let endpoint = endpoint::build(endpoint_config)?;
            let sender = RetryingSender::new(
                endpoint,
                Arc::clone(&persistence),
                Arc::clone(&stats),
                RetryPolicy::default(),
            )?;
            senders_by_name.insert(endpoint_config.name.clone(), Arc::new(sender));
        }

        let mut inputs = HashMap::new();
        for metric in &config.metrics {
            let senders = metric
                .endpoint_names()
                .into_iter()
                .filter_map(|name| senders_by_name.get(name).cloned())
                .collect();
            let dispatcher = Arc::new(Dispatcher::new(senders, Arc::clone(&stats)));
            let input = Input::new(metric, dispatcher, Arc::clone(&persistence))?;
            inputs.insert(metric.name.clone(), Arc::new(input));
        }

        let mut sources = Vec::new();
        for source in &config.sources {
            let Some(heartbeat) = &source.heartbeat else {
                continue;
            };
            let Some(input) = inputs.get(&heartbeat.metric) else {
                return Err(AgentError::UnknownMetric(heartbeat.metric.clone()));
            };
            sources.push(Heartbeat::start(&source.name, heartbeat, Arc::clone(input))?);
        }

        info!(
            "Metering agent started: {} metrics, {} endpoints, {} sources",
            inputs.len(),
            senders_by_name.len(),
            sources.len()
        );

        Ok(Self {
            config,
            inputs,
            senders: senders_by_name.into_values().collect(),
            sources,
            stats,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Parses, validates, and queues a JSON report.
    pub async fn add_report_json(&self, text: &str) -> Result<(), AgentError> {
        let report = MetricReport::parse(text)?;
        self.add_report(report).await
    }

    /// Validates and queues a report. Success means the report was accepted, not delivered.
    pub async fn add_report(&self, report: MetricReport) -> Result<(), AgentError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(AgentError::Closed("agent"));
        }
        let definition = self
            .config
            .metric(&report.name)
            .ok_or_else(|| AgentError::UnknownMetric(report.name.clone()))?;
        report.validate(definition)?;
        let input = self
            .inputs
            .get(&report.name)
            .ok_or_else(|| AgentError::UnknownMetric(report.name.clone()))?;
        debug!("Received report for {}", report.name);
        input.add_report(report).await
    }

    #[must_use]
    pub fn status(&self) -> Snapshot {
        self.stats.snapshot()
    }

    pub fn status_json(&self) -> Result<String, AgentError> {
        Ok(serde_json::to_string(&self.status())?)
    }

    /// Stops sources, pushes pending aggregates, and stops senders and endpoints. Reports that
    /// could not be delivered yet stay in persisted state. Later calls do nothing.
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Metering agent shutting down");

        for source in &self.sources {
            source.shutdown().await;
        }
        for input in self.inputs.values() {
            input.shutdown().await;
        }
        for sender in &self.senders {
            sender.shutdown().await;
        }

        info!("Metering agent stopped");
        Ok(())
    }
}
