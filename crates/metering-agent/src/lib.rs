// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # Metering Agent
//!
//! Accepts usage reports for configured metrics, aggregates them, and delivers the results to
//! one or more endpoints, keeping track of delivery health.
//!
//! - [`config`]: the declarative agent configuration
//! - [`report`]: report model and validation
//! - [`aggregator`]: per-metric aggregation and passthrough inputs
//! - [`sender`]: dispatch and retrying delivery
//! - [`endpoint`]: delivery destinations
//! - [`stats`]: delivery health tracking
//! - [`agent`]: the running agent

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod agent;
pub mod aggregator;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod heartbeat;
pub mod persistence;
pub mod report;
pub mod sender;
pub mod stats;

pub use agent::Agent;
pub use error::AgentError;
pub use stats::Snapshot;
