//! C boundary for the metering agent.
//!
//! Agents are identified by an integer handle. Every function reports failure through a
//! nullable `error_message`, which the caller owns and must release with
//! [`metering_free_string`].
//!
//! ## Panic Safety
//!
//! All functions run their body under `std::panic::catch_unwind`, so a panic inside the agent
//! is returned as an error message instead of unwinding into the caller.
//!
//! ## Usage Example (C)
//!
//! ```c
//! #include "metering_agent_native.h"
//!
//! MeteringInitResult init = metering_agent_init(config_yaml, "/var/lib/metering");
//! if (init.error_message != NULL) {
//!     fprintf(stderr, "init failed: %s\n", init.error_message);
//!     metering_free_string(init.error_message);
//!     return 1;
//! }
//!
//! MeteringResult added = metering_agent_add_report(init.id, report_json);
//! metering_free_string(added.error_message);
//!
//! MeteringStatus status = metering_agent_get_status(init.id);
//! printf("last success: %lld\n", (long long)status.last_report_success);
//! metering_free_string(status.error_message);
//!
//! MeteringResult stopped = metering_agent_shutdown(init.id);
//! metering_free_string(stopped.error_message);
//! ```

use std::any::Any;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use tracing::error;

use crate::logger;
use crate::registry::{self, UNASSIGNED_HANDLE};

const AGENT_DOES_NOT_EXIST: &str = "Agent does not exist";
const AGENT_ALREADY_SHUTDOWN: &str = "Agent already shutdown";

/// Result of [`metering_agent_init`].
#[repr(C)]
pub struct MeteringInitResult {
    /// NULL on success; otherwise must be freed with `metering_free_string()`
    pub error_message: *mut c_char,
    /// Handle of the new agent, or -1 on error
    pub id: c_int,
}

/// Result of operations that return nothing but a possible error.
#[repr(C)]
pub struct MeteringResult {
    /// NULL on success; otherwise must be freed with `metering_free_string()`
    pub error_message: *mut c_char,
}

/// Result of [`metering_agent_get_status`].
#[repr(C)]
pub struct MeteringStatus {
    /// Failed sends since the last successful one
    pub current_failure_count: c_int,
    /// Failed sends since the agent started
    pub total_failure_count: c_int,
    /// Time of the last successful send in seconds since the Unix epoch, 0 if none
    pub last_report_success: i64,
    /// NULL on success; otherwise must be freed with `metering_free_string()`
    pub error_message: *mut c_char,
}

impl MeteringResult {
    fn from_result(result: Result<(), String>) -> Self {
        Self {
            error_message: result.err().map_or(ptr::null_mut(), into_c_string),
        }
    }
}

/// Moves `message` into a heap string owned by the caller. Interior NUL bytes are replaced.
fn into_c_string(message: String) -> *mut c_char {
    CString::new(message.replace('\0', " "))
        .unwrap_or_default()
        .into_raw()
}

/// Reads a borrowed C string. NULL reads as the empty string.
///
/// # Safety
/// `ptr` must be NULL or point to a NUL-terminated string that outlives the call.
unsafe fn cstr_to_string(ptr: *const c_char, what: &str) -> Result<String, String> {
    if ptr.is_null() {
        return Ok(String::new());
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map(str::to_string)
        .map_err(|e| format!("{what} is not valid UTF-8: {e}"))
}

fn panic_message(payload: &(dyn Any + Send), operation: &str) -> String {
    let message = if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Panic during {operation}: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Panic during {operation}: {s}")
    } else {
        format!("Panic during {operation} (unknown cause)")
    };
    error!("{message}");
    message
}

/// Creates and starts an agent.
///
/// # Safety
///
/// - `config` and `state_dir` must each be NULL or a valid NUL-terminated string
/// - On success the returned `id` must eventually be passed to `metering_agent_shutdown()`
///
/// # Returns
///
/// A `MeteringInitResult` whose `id` identifies the agent, or whose `error_message` describes
/// why the configuration was rejected. An empty `state_dir` keeps agent state in memory.
#[no_mangle]
pub unsafe extern "C" fn metering_agent_init(
    config: *const c_char,
    state_dir: *const c_char,
) -> MeteringInitResult {
    let result = catch_unwind(AssertUnwindSafe(|| {
        logger::init();
        let config = cstr_to_string(config, "config")?;
        let state_dir = cstr_to_string(state_dir, "state directory")?;
        registry::register(&config, &state_dir).map_err(|e| e.to_string())
    }))
    .unwrap_or_else(|payload| Err(panic_message(payload.as_ref(), "agent init")));

    match result {
        Ok(id) => MeteringInitResult {
            error_message: ptr::null_mut(),
            id,
        },
        Err(message) => MeteringInitResult {
            error_message: into_c_string(message),
            id: UNASSIGNED_HANDLE,
        },
    }
}

/// Submits a JSON report to an agent. Success means the report was accepted, not delivered.
///
/// # Safety
///
/// `report` must be NULL or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn metering_agent_add_report(
    id: c_int,
    report: *const c_char,
) -> MeteringResult {
    let result = catch_unwind(AssertUnwindSafe(|| {
        let agent = registry::get(id).ok_or_else(|| AGENT_DOES_NOT_EXIST.to_string())?;
        let report = cstr_to_string(report, "report")?;
        agent.add_report(&report).map_err(|e| e.to_string())
    }))
    .unwrap_or_else(|payload| Err(panic_message(payload.as_ref(), "add report")));

    MeteringResult::from_result(result)
}

/// Returns an agent's delivery health.
///
/// On error the numeric fields are zero.
#[no_mangle]
pub extern "C" fn metering_agent_get_status(id: c_int) -> MeteringStatus {
    let result = catch_unwind(|| {
        registry::get(id)
            .map(|agent| agent.status())
            .ok_or_else(|| AGENT_DOES_NOT_EXIST.to_string())
    })
    .unwrap_or_else(|payload| Err(panic_message(payload.as_ref(), "get status")));

    match result {
        Ok(snapshot) => MeteringStatus {
            current_failure_count: saturating_c_int(snapshot.current_failure_count),
            total_failure_count: saturating_c_int(snapshot.total_failure_count),
            last_report_success: snapshot.last_report_success.timestamp(),
            error_message: ptr::null_mut(),
        },
        Err(message) => MeteringStatus {
            current_failure_count: 0,
            total_failure_count: 0,
            last_report_success: 0,
            error_message: into_c_string(message),
        },
    }
}

/// Stops an agent and invalidates its handle.
///
/// Pending aggregates are pushed and endpoints are stopped before this returns. Reports not yet
/// delivered remain in the state directory for the next agent started on it.
#[no_mangle]
pub extern "C" fn metering_agent_shutdown(id: c_int) -> MeteringResult {
    let result = catch_unwind(|| match registry::shutdown(id) {
        Some(result) => result.map_err(|e| e.to_string()),
        None => Err(AGENT_ALREADY_SHUTDOWN.to_string()),
    })
    .unwrap_or_else(|payload| Err(panic_message(payload.as_ref(), "agent shutdown")));

    MeteringResult::from_result(result)
}

/// Frees a string returned by this library.
///
/// # Safety
///
/// - `string` must be NULL or a pointer returned by this library
/// - `string` must not have been freed already
#[no_mangle]
pub unsafe extern "C" fn metering_free_string(string: *mut c_char) {
    if string.is_null() {
        return;
    }
    drop(CString::from_raw(string));
}

fn saturating_c_int(value: u64) -> c_int {
    c_int::try_from(value).unwrap_or(c_int::MAX)
}
