// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Delivery status tracking.
//!
//! Every report handed to the dispatcher is registered with the set of endpoints that will
//! deliver it. Each endpoint then reports its own success or failure. A send is successful once
//! every endpoint has succeeded, and failed as soon as any endpoint fails.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

/// Maximum number of in-flight sends tracked before the oldest is dropped.
pub const MAX_PENDING_SENDS: usize = 1000;

/// Point-in-time delivery status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Time of the last fully successful send, or the Unix epoch if none has happened.
    pub last_report_success: DateTime<Utc>,
    /// Failures since the last success.
    pub current_failure_count: u64,
    /// Failures over the lifetime of the agent. Never decreases.
    pub total_failure_count: u64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            last_report_success: DateTime::UNIX_EPOCH,
            current_failure_count: 0,
            total_failure_count: 0,
        }
    }
}

#[derive(Debug)]
struct PendingSend {
    handlers: HashSet<String>,
    order: u64,
}

#[derive(Debug, Default)]
struct State {
    pending: HashMap<String, PendingSend>,
    registered: u64,
    current: Snapshot,
}

/// In-memory recorder of send outcomes. Stats reset when the agent restarts.
#[derive(Debug, Default)]
pub struct StatsRecorder {
    state: RwLock<State>,
}

impl StatsRecorder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a send of report `id` that will be carried out by `handlers`.
    pub fn register<S: AsRef<str>>(&self, id: &str, handlers: &[S]) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.registered += 1;
        let order = state.registered;
        state.pending.insert(
            id.to_string(),
            PendingSend {
                handlers: handlers.iter().map(|h| h.as_ref().to_string()).collect(),
                order,
            },
        );

        if state.pending.len() > MAX_PENDING_SENDS {
            let oldest = state
                .pending
                .iter()
                .min_by_key(|(_, p)| p.order)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                warn!("Too many pending sends; dropping send {oldest}");
                state.pending.remove(&oldest);
            }
        }
    }

    pub fn send_succeeded(&self, id: &str, handler: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let Some(pending) = state.pending.get_mut(id) else {
            warn!("Ignoring success from handler {handler} for unknown report {id}");
            return;
        };
        pending.handlers.remove(handler);
        if pending.handlers.is_empty() {
            state.pending.remove(id);
            state.current.current_failure_count = 0;
            state.current.last_report_success = Utc::now();
        }
    }

    pub fn send_failed(&self, id: &str, handler: &str) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.pending.remove(id).is_some() {
            state.current.current_failure_count += 1;
            state.current.total_failure_count += 1;
        } else {
            warn!("Ignoring failure from handler {handler} for unknown report {id}");
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .current
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.state.read().unwrap().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn test_initial_snapshot() {
        let stats = StatsRecorder::new();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.last_report_success, DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(snapshot.current_failure_count, 0);
        assert_eq!(snapshot.total_failure_count, 0);
    }

    #[test]
    fn test_success_requires_all_handlers() {
        let stats = StatsRecorder::new();
        stats.register("r1", &["disk", "disk2"]);

        stats.send_succeeded("r1", "disk");
        assert_eq!(stats.snapshot().last_report_success, DateTime::<Utc>::UNIX_EPOCH);

        stats.send_succeeded("r1", "disk2");
        assert!(stats.snapshot().last_report_success > DateTime::<Utc>::UNIX_EPOCH);
        assert_eq!(stats.pending_len(), 0);
    }

    #[test]
    fn test_failure_streak_resets_on_success() {
        let stats = StatsRecorder::new();
        for id in ["r1", "r2", "r3"] {
            stats.register(id, &["disk"]);
        }
        stats.send_failed("r1", "disk");
        stats.send_failed("r2", "disk");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.current_failure_count, 2);
        assert_eq!(snapshot.total_failure_count, 2);

        stats.send_succeeded("r3", "disk");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.current_failure_count, 0);
        assert_eq!(snapshot.total_failure_count, 2);
    }

    #[test]
    fn test_one_failed_handler_fails_the_send() {
        let stats = StatsRecorder::new();
        stats.register("r1", &["a", "b"]);
        stats.send_succeeded("r1", "a");
        stats.send_failed("r1", "b");
        // A late result for the same report is ignored.
        stats.send_failed("r1", "a");
        assert_eq!(stats.snapshot().total_failure_count, 1);
    }

    #[test]
    fn test_unknown_report_is_ignored() {
        let stats = StatsRecorder::new();
        stats.send_succeeded("missing", "disk");
        stats.send_failed("missing", "disk");
        assert_eq!(stats.snapshot(), Snapshot::default());
    }

    #[test]
    #[traced_test]
    fn test_pending_sends_are_bounded() {
        let stats = StatsRecorder::new();
        for i in 0..=MAX_PENDING_SENDS {
            stats.register(&format!("r{i}"), &["disk"]);
        }
        assert_eq!(stats.pending_len(), MAX_PENDING_SENDS);
        assert!(logs_contain("Too many pending sends; dropping send r0"));
        // The oldest send was evicted, so its completion is ignored.
        stats.send_succeeded("r0", "disk");
        assert_eq!(stats.snapshot().last_report_success, DateTime::<Utc>::UNIX_EPOCH);
        stats.send_succeeded("r1", "disk");
        assert!(stats.snapshot().last_report_success > DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(Snapshot::default()).unwrap();
        assert_eq!(json["currentFailureCount"], 0);
        assert_eq!(json["totalFailureCount"], 0);
        assert_eq!(json["lastReportSuccess"], "1970-01-01T00:00:00Z");
    }
}
