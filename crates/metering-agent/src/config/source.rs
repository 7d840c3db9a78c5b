// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::config::{interval, Config, MAX_INTERVAL_SECONDS};
use crate::error::AgentError;
use crate::report::MetricValue;

/// A report source that runs inside the agent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(default)]
    pub heartbeat: Option<HeartbeatConfig>,
}

/// Emits a fixed value for `metric` every `interval_seconds`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatConfig {
    pub metric: String,
    pub interval_seconds: i64,
    pub value: MetricValue,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl SourceConfig {
    pub(crate) fn validate(&self, config: &Config) -> Result<(), AgentError> {
        if self.name.is_empty() {
            return Err(AgentError::Config("source: missing name".to_string()));
        }
        let Some(heartbeat) = &self.heartbeat else {
            return Err(AgentError::Config(format!(
                "source {}: missing type configuration",
                self.name
            )));
        };
        let Some(metric) = config.metric(&heartbeat.metric) else {
            return Err(AgentError::Config(format!(
                "source {}: heartbeat: unknown metric {}",
                self.name, heartbeat.metric
            )));
        };
        if heartbeat.interval_seconds <= 0 {
            return Err(AgentError::Config(format!(
                "source {}: heartbeat: intervalSeconds must be > 0",
                self.name
            )));
        }
        if interval(heartbeat.interval_seconds).is_none() {
            return Err(AgentError::Config(format!(
                "source {}: heartbeat: intervalSeconds must be <= {MAX_INTERVAL_SECONDS}",
                self.name
            )));
        }
        heartbeat
            .value
            .validate(&metric.name, metric.metric_type)
            .map_err(|e| AgentError::Config(format!("source {}: heartbeat: {e}", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use crate::config::tests::disk_config;
    use crate::config::Config;

    fn with_source(source: &str) -> String {
        format!("{}sources:\n{source}", disk_config("/tmp/reports"))
    }

    #[test]
    fn test_valid_heartbeat() {
        let text = with_source(
            r"- name: instance_time
  heartbeat:
    metric: instance_time
    intervalSeconds: 1
    value:
      doubleValue: 1.0
    labels:
      auto: 'true'
",
        );
        let config = Config::parse_and_validate(&text).unwrap();
        let heartbeat = config.sources[0].heartbeat.as_ref().unwrap();
        assert_eq!(heartbeat.interval_seconds, 1);
        assert_eq!(heartbeat.labels.get("auto").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_heartbeat_unknown_metric() {
        let text = with_source(
            r"- name: hb
  heartbeat:
    metric: nope
    intervalSeconds: 1
    value:
      int64Value: 1
",
        );
        let err = Config::parse_and_validate(&text).unwrap_err();
        assert!(err.to_string().contains("unknown metric nope"));
    }

    #[test]
    fn test_heartbeat_interval_is_bounded() {
        let text = with_source(
            r"- name: hb
  heartbeat:
    metric: instance_time
    intervalSeconds: 9223372036854775807
    value:
      doubleValue: 1.0
",
        );
        let err = Config::parse_and_validate(&text).unwrap_err();
        assert!(err.to_string().contains("intervalSeconds must be <= 31536000"));

        let err = Config::parse_and_validate(&text.replace("9223372036854775807", "0")).unwrap_err();
        assert!(err.to_string().contains("intervalSeconds must be > 0"));
    }

    #[test]
    fn test_heartbeat_value_type_mismatch() {
        let text = with_source(
            r"- name: hb
  heartbeat:
    metric: instance_time
    intervalSeconds: 1
    value:
      int64Value: 1
",
        );
        let err = Config::parse_and_validate(&text).unwrap_err();
        assert!(err.to_string().contains("integer value specified"));
    }
}
