// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery endpoints.

pub mod disk;

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::EndpointConfig;
use crate::error::AgentError;
use crate::report::StampedMetricReport;

pub use disk::DiskEndpoint;

/// A destination for finished reports.
#[async_trait]
pub trait Endpoint: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// Delivers one report. Called by a single sender task, one report at a time.
    async fn send(&self, report: &StampedMetricReport) -> Result<(), AgentError>;

    /// Whether a failed send may succeed if retried.
    fn is_transient(&self, error: &AgentError) -> bool;

    /// Stops any background work owned by the endpoint.
    async fn shutdown(&self);
}

/// Builds the endpoint described by `config`. Must be called within a tokio runtime.
pub fn build(config: &EndpointConfig) -> Result<Arc<dyn Endpoint>, AgentError> {
    match &config.disk {
        Some(disk) => Ok(Arc::new(DiskEndpoint::new(
            &config.name,
            &disk.report_dir,
            disk.expire_seconds,
        ))),
        None => Err(AgentError::Config(format!(
            "endpoint {}: missing type configuration",
            config.name
        ))),
    }
}
