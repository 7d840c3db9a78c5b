// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use serde::Deserialize;

use crate::error::AgentError;

/// A named delivery target. Exactly one endpoint type must be configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EndpointConfig {
    pub name: String,
    #[serde(default)]
    pub disk: Option<DiskEndpointConfig>,
}

/// Writes each report as a JSON file in `report_dir`. Files older than `expire_seconds` are
/// removed periodically.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskEndpointConfig {
    pub report_dir: String,
    #[serde(default)]
    pub expire_seconds: i64,
}

impl EndpointConfig {
    pub(crate) fn validate(&self) -> Result<(), AgentError> {
        if self.name.is_empty() {
            return Err(AgentError::Config("endpoint: missing name".to_string()));
        }
        if self.name.contains('/') {
            return Err(AgentError::Config(format!(
                "endpoint {}: name must not contain '/'",
                self.name
            )));
        }
        match &self.disk {
            Some(disk) => disk.validate(&self.name),
            None => Err(AgentError::Config(format!(
                "endpoint {}: missing type configuration",
                self.name
            ))),
        }
    }
}

impl DiskEndpointConfig {
    fn validate(&self, endpoint: &str) -> Result<(), AgentError> {
        if self.expire_seconds < 0 {
            return Err(AgentError::Config(format!(
                "endpoint {endpoint}: disk: expireSeconds must not be negative"
            )));
        }
        if self.report_dir.is_empty() {
            return Err(AgentError::Config(format!(
                "endpoint {endpoint}: disk: missing report directory"
            )));
        }
        Ok(())
    }
}
