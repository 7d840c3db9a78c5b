// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Errors that can occur while running a metering agent
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid report: {0}")]
    InvalidReport(String),

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0} is closed")]
    Closed(&'static str),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl From<figment::Error> for AgentError {
    fn from(e: figment::Error) -> Self {
        AgentError::Config(e.to_string())
    }
}
