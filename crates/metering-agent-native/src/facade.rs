//! Host-side owner of one engine agent.
//!
//! An [`AgentFacade`] moves through `Unbound -> Live -> Retired`. It only exists once the
//! engine has accepted its configuration, and only a live facade ever calls across the
//! boundary. Shutting down, explicitly or by dropping the facade, retires the handle whatever
//! the engine answers.

use std::ffi::{CString, NulError};
use std::os::raw::c_int;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::boundary::{EngineBoundary, NativeBoundary};
use crate::registry::UNASSIGNED_HANDLE;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FacadeError {
    #[error("Agent initialization failed: {0}")]
    Initialization(String),

    #[error("Report rejected: {0}")]
    RejectedReport(String),

    #[error("Status retrieval failed: {0}")]
    StatusRetrieval(String),

    #[error("Agent shutdown failed: {0}")]
    Shutdown(String),

    #[error("Agent has already been shut down")]
    UseAfterRetirement,

    #[error("{0} contains an interior NUL byte")]
    InvalidString(&'static str),
}

/// Delivery health of an agent at the time of the query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentStatus {
    /// `DateTime::UNIX_EPOCH` until the first successful delivery.
    pub last_report_success: DateTime<Utc>,
    /// Failed sends since the last success.
    pub current_failure_count: u64,
    /// Failed sends since the agent started. Never decreases.
    pub total_failure_count: u64,
    /// Whether the status query itself succeeded. Counters are zero when it did not.
    pub result: Result<(), FacadeError>,
}

impl AgentStatus {
    fn failed(error: FacadeError) -> Self {
        Self {
            last_report_success: DateTime::UNIX_EPOCH,
            current_failure_count: 0,
            total_failure_count: 0,
            result: Err(error),
        }
    }
}

fn to_c_string(value: &str, what: &'static str) -> Result<CString, FacadeError> {
    CString::new(value).map_err(|_: NulError| FacadeError::InvalidString(what))
}

fn epoch_seconds_to_time(seconds: i64) -> DateTime<Utc> {
    if seconds <= 0 {
        return DateTime::UNIX_EPOCH;
    }
    DateTime::from_timestamp(seconds, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Owns at most one live agent handle.
#[derive(Debug)]
pub struct AgentFacade<B: EngineBoundary = NativeBoundary> {
    boundary: B,
    handle: c_int,
}

impl AgentFacade<NativeBoundary> {
    /// Starts an agent in this process. An empty `state_dir` keeps state in memory.
    pub fn create(config: &str, state_dir: &str) -> Result<Self, FacadeError> {
        Self::create_with(NativeBoundary, config, state_dir)
    }
}

impl<B: EngineBoundary> AgentFacade<B> {
    /// Starts an agent through `boundary`. The configuration is validated by the engine, not
    /// here.
    pub fn create_with(boundary: B, config: &str, state_dir: &str) -> Result<Self, FacadeError> {
        let config = to_c_string(config, "config")?;
        let state_dir = to_c_string(state_dir, "state directory")?;

        let (handle, error) = boundary.initialize(&config, &state_dir);
        if let Some(message) = error.message() {
            return Err(FacadeError::Initialization(message));
        }
        if handle == UNASSIGNED_HANDLE {
            return Err(FacadeError::Initialization(
                "engine returned no handle".to_string(),
            ));
        }
        debug!("Created agent facade for handle {handle}");
        Ok(Self { boundary, handle })
    }

    #[must_use]
    pub fn handle(&self) -> c_int {
        self.handle
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.handle != UNASSIGNED_HANDLE
    }

    /// Hands a JSON report to the agent. Success means accepted for processing, not delivered.
    pub fn add_report(&self, report: &str) -> Result<(), FacadeError> {
        if !self.is_live() {
            return Err(FacadeError::UseAfterRetirement);
        }
        let report = to_c_string(report, "report")?;
        match self.boundary.add_report(self.handle, &report).message() {
            Some(message) => Err(FacadeError::RejectedReport(message)),
            None => Ok(()),
        }
    }

    #[must_use]
    pub fn get_status(&self) -> AgentStatus {
        if !self.is_live() {
            return AgentStatus::failed(FacadeError::UseAfterRetirement);
        }
        let (status, error) = self.boundary.get_status(self.handle);
        if let Some(message) = error.message() {
            return AgentStatus::failed(FacadeError::StatusRetrieval(message));
        }
        AgentStatus {
            last_report_success: epoch_seconds_to_time(status.last_report_success),
            current_failure_count: u64::try_from(status.current_failure_count).unwrap_or(0),
            total_failure_count: u64::try_from(status.total_failure_count).unwrap_or(0),
            result: Ok(()),
        }
    }

    /// Shuts the agent down. The handle is retired even when the engine reports an error.
    pub fn shutdown(&mut self) -> Result<(), FacadeError> {
        if !self.is_live() {
            return Err(FacadeError::UseAfterRetirement);
        }
        self.retire().map_err(FacadeError::Shutdown)
    }

    fn retire(&mut self) -> Result<(), String> {
        let handle = std::mem::replace(&mut self.handle, UNASSIGNED_HANDLE);
        debug!("Retiring agent handle {handle}");
        match self.boundary.shutdown(handle).message() {
            Some(message) => Err(message),
            None => Ok(()),
        }
    }
}

impl<B: EngineBoundary> Drop for AgentFacade<B> {
    fn drop(&mut self) {
        if !self.is_live() {
            return;
        }
        let handle = self.handle;
        if let Err(message) = self.retire() {
            warn!("Shutdown of agent {handle} failed during drop: {message}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::ffi::CStr;
    use std::rc::Rc;

    use super::*;
    use crate::boundary::{BoundaryError, RawStatus};

    #[derive(Debug, Default)]
    struct Calls {
        initialize: usize,
        add_report: usize,
        get_status: usize,
        shutdown: Vec<c_int>,
        reports: Vec<String>,
    }

    /// Accepts everything except what it is told to reject, and counts every call.
    #[derive(Debug, Default, Clone)]
    struct CountingBoundary {
        calls: Rc<RefCell<Calls>>,
        init_error: Option<&'static str>,
        report_error: Option<&'static str>,
        status_error: Option<&'static str>,
        shutdown_error: Option<&'static str>,
        status: RawStatus,
    }

    fn error(message: Option<&str>) -> BoundaryError {
        message.map_or_else(BoundaryError::none, BoundaryError::from_message)
    }

    impl EngineBoundary for CountingBoundary {
        fn initialize(&self, _config: &CStr, _state_dir: &CStr) -> (c_int, BoundaryError) {
            self.calls.borrow_mut().initialize += 1;
            match self.init_error {
                Some(message) => (UNASSIGNED_HANDLE, error(Some(message))),
                None => (7, BoundaryError::none()),
            }
        }

        fn add_report(&self, _handle: c_int, report: &CStr) -> BoundaryError {
            let mut calls = self.calls.borrow_mut();
            calls.add_report += 1;
            calls.reports.push(report.to_string_lossy().into_owned());
            error(self.report_error)
        }

        fn get_status(&self, _handle: c_int) -> (RawStatus, BoundaryError) {
            self.calls.borrow_mut().get_status += 1;
            match self.status_error {
                Some(message) => (RawStatus::default(), error(Some(message))),
                None => (self.status, BoundaryError::none()),
            }
        }

        fn shutdown(&self, handle: c_int) -> BoundaryError {
            self.calls.borrow_mut().shutdown.push(handle);
            error(self.shutdown_error)
        }
    }

    #[test]
    fn test_create_and_shutdown() {
        let boundary = CountingBoundary::default();
        let calls = Rc::clone(&boundary.calls);

        let mut facade = AgentFacade::create_with(boundary, "metrics: []", "").unwrap();
        assert!(facade.is_live());
        assert_eq!(facade.handle(), 7);
        facade.shutdown().unwrap();
        assert!(!facade.is_live());
        assert_eq!(facade.handle(), UNASSIGNED_HANDLE);
        drop(facade);

        let calls = calls.borrow();
        assert_eq!(calls.initialize, 1);
        assert_eq!(calls.shutdown, vec![7]);
    }

    #[test]
    fn test_failed_create_never_shuts_down() {
        let boundary = CountingBoundary {
            init_error: Some("Invalid configuration: bad_config"),
            ..CountingBoundary::default()
        };
        let calls = Rc::clone(&boundary.calls);

        let err = AgentFacade::create_with(boundary, "bad_config", "").unwrap_err();
        assert_eq!(
            err,
            FacadeError::Initialization("Invalid configuration: bad_config".to_string())
        );
        assert_eq!(calls.borrow().initialize, 1);
        assert!(calls.borrow().shutdown.is_empty());
    }

    #[test]
    fn test_interior_nul_fails_locally() {
        let boundary = CountingBoundary::default();
        let calls = Rc::clone(&boundary.calls);

        let err = AgentFacade::create_with(boundary.clone(), "a\0b", "").unwrap_err();
        assert_eq!(err, FacadeError::InvalidString("config"));
        assert_eq!(calls.borrow().initialize, 0);

        let facade = AgentFacade::create_with(boundary, "", "").unwrap();
        assert_eq!(
            facade.add_report("{\0}"),
            Err(FacadeError::InvalidString("report"))
        );
        assert_eq!(calls.borrow().add_report, 0);
    }

    #[test]
    fn test_rejected_report() {
        let boundary = CountingBoundary {
            report_error: Some("Invalid report: expected value"),
            ..CountingBoundary::default()
        };
        let facade = AgentFacade::create_with(boundary, "", "").unwrap();
        assert_eq!(
            facade.add_report("malformed_report"),
            Err(FacadeError::RejectedReport(
                "Invalid report: expected value".to_string()
            ))
        );
    }

    #[test]
    fn test_report_is_forwarded_verbatim() {
        let boundary = CountingBoundary::default();
        let calls = Rc::clone(&boundary.calls);
        let facade = AgentFacade::create_with(boundary, "", "").unwrap();
        facade.add_report(r#"{"name":"int-metric"}"#).unwrap();
        assert_eq!(calls.borrow().reports, vec![r#"{"name":"int-metric"}"#]);
    }

    #[test]
    fn test_status_conversion() {
        let boundary = CountingBoundary {
            status: RawStatus {
                last_report_success: 1_700_000_000,
                current_failure_count: 2,
                total_failure_count: 5,
            },
            ..CountingBoundary::default()
        };
        let facade = AgentFacade::create_with(boundary, "", "").unwrap();
        let status = facade.get_status();
        assert_eq!(status.result, Ok(()));
        assert_eq!(status.last_report_success.timestamp(), 1_700_000_000);
        assert_eq!(status.current_failure_count, 2);
        assert_eq!(status.total_failure_count, 5);
    }

    #[test]
    fn test_status_before_first_success_is_epoch() {
        let facade = AgentFacade::create_with(CountingBoundary::default(), "", "").unwrap();
        let status = facade.get_status();
        assert_eq!(status.last_report_success, DateTime::UNIX_EPOCH);
        assert_eq!(status.result, Ok(()));
    }

    #[test]
    fn test_status_retrieval_failure() {
        let boundary = CountingBoundary {
            status_error: Some("Agent does not exist"),
            status: RawStatus {
                last_report_success: 1_700_000_000,
                current_failure_count: 1,
                total_failure_count: 1,
            },
            ..CountingBoundary::default()
        };
        let facade = AgentFacade::create_with(boundary, "", "").unwrap();
        let status = facade.get_status();
        assert_eq!(
            status.result,
            Err(FacadeError::StatusRetrieval("Agent does not exist".to_string()))
        );
        assert_eq!(status.last_report_success, DateTime::UNIX_EPOCH);
        assert_eq!(status.total_failure_count, 0);
    }

    #[test]
    fn test_use_after_retirement_stays_local() {
        let boundary = CountingBoundary::default();
        let calls = Rc::clone(&boundary.calls);
        let mut facade = AgentFacade::create_with(boundary, "", "").unwrap();
        facade.shutdown().unwrap();

        assert_eq!(facade.shutdown(), Err(FacadeError::UseAfterRetirement));
        assert_eq!(facade.add_report("{}"), Err(FacadeError::UseAfterRetirement));
        assert_eq!(
            facade.get_status().result,
            Err(FacadeError::UseAfterRetirement)
        );
        drop(facade);

        let calls = calls.borrow();
        assert_eq!(calls.add_report, 0);
        assert_eq!(calls.get_status, 0);
        assert_eq!(calls.shutdown.len(), 1);
    }

    #[test]
    fn test_failed_shutdown_still_retires() {
        let boundary = CountingBoundary {
            shutdown_error: Some("Agent already shutdown"),
            ..CountingBoundary::default()
        };
        let calls = Rc::clone(&boundary.calls);
        let mut facade = AgentFacade::create_with(boundary, "", "").unwrap();
        assert_eq!(
            facade.shutdown(),
            Err(FacadeError::Shutdown("Agent already shutdown".to_string()))
        );
        assert!(!facade.is_live());
        drop(facade);
        assert_eq!(calls.borrow().shutdown.len(), 1);
    }

    #[test]
    fn test_drop_retires_live_facade() {
        let boundary = CountingBoundary {
            shutdown_error: Some("Agent already shutdown"),
            ..CountingBoundary::default()
        };
        let calls = Rc::clone(&boundary.calls);
        drop(AgentFacade::create_with(boundary, "", "").unwrap());
        assert_eq!(calls.borrow().shutdown, vec![7]);
    }

    #[test]
    fn test_epoch_seconds_to_time() {
        assert_eq!(epoch_seconds_to_time(0), DateTime::UNIX_EPOCH);
        assert_eq!(epoch_seconds_to_time(-5), DateTime::UNIX_EPOCH);
        assert_eq!(epoch_seconds_to_time(60).timestamp(), 60);
    }
}
