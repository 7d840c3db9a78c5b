// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Agent configuration document.
//!
//! The configuration is a YAML (or JSON, which is a subset of YAML) document describing the
//! reportable metrics, the endpoints that aggregated reports are delivered to, and optional
//! report sources that run inside the agent.
//!
//! ```yaml
//! metrics:
//! - name: requests
//!   type: int
//!   aggregation:
//!     bufferSeconds: 60
//!   endpoints:
//!   - name: disk
//! endpoints:
//! - name: disk
//!   disk:
//!     reportDir: /var/lib/metering/reports
//!     expireSeconds: 3600
//! ```
//!
//! Parsing and validation are separate steps: [`Config::parse`] only checks that the document
//! is well-formed, [`Config::validate`] checks cross references and value ranges.

pub mod endpoint;
pub mod source;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Format, Yaml},
    Figment,
};
use serde::Deserialize;

pub use endpoint::{DiskEndpointConfig, EndpointConfig};
pub use source::{HeartbeatConfig, SourceConfig};

use crate::error::AgentError;

/// Upper bound for `bufferSeconds` and `intervalSeconds`: one year.
pub const MAX_INTERVAL_SECONDS: i64 = 365 * 24 * 60 * 60;

/// Converts a configured number of seconds into a positive duration no longer than
/// [`MAX_INTERVAL_SECONDS`].
#[must_use]
pub fn interval(seconds: i64) -> Option<Duration> {
    if (1..=MAX_INTERVAL_SECONDS).contains(&seconds) {
        u64::try_from(seconds).ok().map(Duration::from_secs)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub metrics: Vec<MetricDefinition>,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

/// Value type of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Int,
    Double,
}

/// Describes a single reportable metric.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub metric_type: MetricType,
    #[serde(default)]
    pub aggregation: Option<Aggregation>,
    #[serde(default)]
    pub passthrough: Option<Passthrough>,
    #[serde(default)]
    pub endpoints: Vec<EndpointRef>,
}

/// Reports for the metric are summed per label set and forwarded every `buffer_seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregation {
    pub buffer_seconds: i64,
}

/// Reports for the metric are forwarded as soon as they are accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub struct Passthrough {}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointRef {
    pub name: String,
}

impl Config {
    /// Parses a YAML or JSON configuration document.
    pub fn parse(text: &str) -> Result<Self, AgentError> {
        Ok(Figment::from(Yaml::string(text)).extract()?)
    }

    /// Reads and parses a configuration file.
    pub fn load(path: &Path) -> Result<Self, AgentError> {
        Ok(Figment::from(Yaml::file_exact(path)).extract()?)
    }

    /// Parses and validates a configuration document.
    pub fn parse_and_validate(text: &str) -> Result<Self, AgentError> {
        let config = Self::parse(text)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn metric(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.iter().find(|m| m.name == name)
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        if self.metrics.is_empty() {
            return Err(AgentError::Config("no metrics defined".to_string()));
        }
        if self.endpoints.is_empty() {
            return Err(AgentError::Config("no endpoints defined".to_string()));
        }

        let mut endpoint_names = HashSet::new();
        for endpoint in &self.endpoints {
            endpoint.validate()?;
            if !endpoint_names.insert(endpoint.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "endpoint {}: multiple endpoints with the same name",
                    endpoint.name
                )));
            }
        }

        let mut metric_names = HashSet::new();
        for metric in &self.metrics {
            metric.validate(&endpoint_names)?;
            if !metric_names.insert(metric.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "metric {}: duplicate name",
                    metric.name
                )));
            }
        }

        let mut source_names = HashSet::new();
        for source in &self.sources {
            source.validate(self)?;
            if !source_names.insert(source.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "source {}: multiple sources with the same name",
                    source.name
                )));
            }
        }

        Ok(())
    }
}

impl MetricDefinition {
    fn validate(&self, endpoint_names: &HashSet<&str>) -> Result<(), AgentError> {
        if self.name.is_empty() {
            return Err(AgentError::Config("missing metric name".to_string()));
        }
        // Persisted state is keyed by a flat file name derived from the metric name.
        if self.name.contains('/') {
            return Err(AgentError::Config(format!(
                "metric {}: name must not contain '/'",
                self.name
            )));
        }
        match (&self.aggregation, &self.passthrough) {
            (None, None) => {
                return Err(AgentError::Config(format!(
                    "metric {}: missing aggregation or passthrough configuration",
                    self.name
                )))
            }
            (Some(_), Some(_)) => {
                return Err(AgentError::Config(format!(
                    "metric {}: both aggregation and passthrough configured",
                    self.name
                )))
            }
            (Some(aggregation), None) if interval(aggregation.buffer_seconds).is_none() => {
                return Err(AgentError::Config(format!(
                    "metric {}: aggregation.bufferSeconds must be > 0 and <= {MAX_INTERVAL_SECONDS}",
                    self.name
                )))
            }
            _ => {}
        }
        if self.endpoints.is_empty() {
            return Err(AgentError::Config(format!(
                "metric {}: no endpoints",
                self.name
            )));
        }
        let mut used = HashSet::new();
        for endpoint in &self.endpoints {
            if !endpoint_names.contains(endpoint.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "metric {}: unknown endpoint {}",
                    self.name, endpoint.name
                )));
            }
            if !used.insert(endpoint.name.as_str()) {
                return Err(AgentError::Config(format!(
                    "metric {}: endpoint {} listed more than once",
                    self.name, endpoint.name
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn endpoint_names(&self) -> Vec<&str> {
        self.endpoints.iter().map(|e| e.name.as_str()).collect()
    }

    /// The aggregation buffer, or `None` for passthrough metrics and out of range values.
    #[must_use]
    pub fn buffer(&self) -> Option<Duration> {
        self.aggregation.and_then(|a| interval(a.buffer_seconds))
    }
}
