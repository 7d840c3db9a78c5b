// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Usage report model.
//!
//! A report is one observation of a metric over a time interval. Reports arrive as JSON:
//!
//! ```json
//! {
//!     "name": "requests",
//!     "startTime": "2025-01-01T00:00:00Z",
//!     "endTime": "2025-01-01T00:01:00Z",
//!     "labels": { "zone": "us-east1" },
//!     "value": { "int64Value": 25 }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{MetricDefinition, MetricType};
use crate::error::AgentError;

/// A single metric value. Exactly one of the fields is expected to be set, matching the
/// metric's declared type.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricValue {
    #[serde(
        rename = "int64Value",
        alias = "int64value",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub int64_value: Option<i64>,
    #[serde(
        rename = "doubleValue",
        alias = "doublevalue",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub double_value: Option<f64>,
}

impl MetricValue {
    #[must_use]
    pub fn int(value: i64) -> Self {
        Self {
            int64_value: Some(value),
            double_value: None,
        }
    }

    #[must_use]
    pub fn double(value: f64) -> Self {
        Self {
            int64_value: None,
            double_value: Some(value),
        }
    }

    /// Checks that exactly one value kind is present and that it matches `metric_type`.
    pub fn validate(&self, metric: &str, metric_type: MetricType) -> Result<(), AgentError> {
        match (metric_type, self.int64_value, self.double_value) {
            (_, Some(_), Some(_)) => Err(AgentError::InvalidReport(format!(
                "metric {metric}: both int64Value and doubleValue specified"
            ))),
            (_, None, None) => Err(AgentError::InvalidReport(format!(
                "metric {metric}: missing value"
            ))),
            (MetricType::Int, None, Some(v)) => Err(AgentError::InvalidReport(format!(
                "metric {metric}: double value specified for integer metric: {v}"
            ))),
            (MetricType::Double, Some(v), None) => Err(AgentError::InvalidReport(format!(
                "metric {metric}: integer value specified for double metric: {v}"
            ))),
            _ => Ok(()),
        }
    }

    /// Adds `other` into this value. Both values must already have been validated against the
    /// same metric type.
    pub fn accumulate(&mut self, other: &MetricValue) {
        if let Some(v) = other.int64_value {
            self.int64_value = Some(self.int64_value.unwrap_or(0).saturating_add(v));
        }
        if let Some(v) = other.double_value {
            self.double_value = Some(self.double_value.unwrap_or(0.0) + v);
        }
    }
}

/// One usage observation for a named metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricReport {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    pub value: MetricValue,
}

impl MetricReport {
    /// Parses a JSON report. Parsing does not validate the report against any configuration.
    pub fn parse(text: &str) -> Result<Self, AgentError> {
        serde_json::from_str(text).map_err(|e| AgentError::InvalidReport(e.to_string()))
    }

    /// Validates this report against its metric definition.
    pub fn validate(&self, definition: &MetricDefinition) -> Result<(), AgentError> {
        if self.name != definition.name {
            return Err(AgentError::InvalidReport(format!(
                "report for metric {} validated against definition {}",
                self.name, definition.name
            )));
        }
        if self.start_time > self.end_time {
            return Err(AgentError::InvalidReport(format!(
                "metric {}: startTime > endTime: {} > {}",
                self.name, self.start_time, self.end_time
            )));
        }
        self.value.validate(&self.name, definition.metric_type)
    }
}

/// A report that has been assigned a unique id, ready to be handed to endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StampedMetricReport {
    pub id: String,
    #[serde(flatten)]
    pub report: MetricReport,
}

impl StampedMetricReport {
    #[must_use]
    pub fn new(report: MetricReport) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            report,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Aggregation, EndpointRef};

    fn definition(metric_type: MetricType) -> MetricDefinition {
        MetricDefinition {
            name: "requests".to_string(),
            metric_type,
            aggregation: Some(Aggregation { buffer_seconds: 1 }),
            passthrough: None,
            endpoints: vec![EndpointRef {
                name: "disk".to_string(),
            }],
        }
    }

    #[test]
    fn test_parse_accepts_lowercase_value_key() {
        let report = MetricReport::parse(
            r#"{
                "name": "requests",
                "value": { "int64value": 25 },
                "startTime": "1991-01-01T00:00:00Z",
                "endTime": "1992-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();
        assert_eq!(report.name, "requests");
        assert_eq!(report.value, MetricValue::int(25));
        assert!(report.labels.is_empty());
        assert!(report.validate(&definition(MetricType::Int)).is_ok());
    }

    #[test]
    fn test_parse_rejects_invalid_json() {
        let err = MetricReport::parse("invalid_json").unwrap_err();
        assert!(matches!(err, AgentError::InvalidReport(_)));
    }

    #[test]
    fn test_validate_rejects_inverted_interval() {
        let report = MetricReport::parse(
            r#"{"name":"requests","value":{"int64Value":1},
                "startTime":"2020-01-02T00:00:00Z","endTime":"2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let err = report.validate(&definition(MetricType::Int)).unwrap_err();
        assert!(err.to_string().contains("startTime > endTime"));
    }

    #[test]
    fn test_validate_rejects_wrong_value_kind() {
        let report = MetricReport::parse(
            r#"{"name":"requests","value":{"doubleValue":1.5},
                "startTime":"2020-01-01T00:00:00Z","endTime":"2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert!(report.validate(&definition(MetricType::Int)).is_err());
        assert!(report.validate(&definition(MetricType::Double)).is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_value() {
        let err = MetricValue::default()
            .validate("requests", MetricType::Int)
            .unwrap_err();
        assert!(err.to_string().contains("missing value"));
    }

    #[test]
    fn test_accumulate() {
        let mut total = MetricValue::int(25);
        total.accumulate(&MetricValue::int(50));
        assert_eq!(total, MetricValue::int(75));

        let mut total = MetricValue::double(0.5);
        total.accumulate(&MetricValue::double(1.25));
        assert_eq!(total, MetricValue::double(1.75));
    }

    #[test]
    fn test_stamped_report_serializes_flat() {
        let report = MetricReport::parse(
            r#"{"name":"requests","value":{"int64Value":3},
                "startTime":"2020-01-01T00:00:00Z","endTime":"2020-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        let stamped = StampedMetricReport::new(report);
        let json: serde_json::Value = serde_json::to_value(&stamped).unwrap();
        assert_eq!(json["name"], "requests");
        assert_eq!(json["value"]["int64Value"], 3);
        assert_eq!(json["id"].as_str().unwrap(), stamped.id);
    }
}
