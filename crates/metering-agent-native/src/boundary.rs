//! The four engine operations as seen from the Rust side of the C boundary.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;

use crate::ffi;

/// An error message allocated by the engine. Freed exactly once, when the guard is dropped.
#[derive(Debug)]
pub struct BoundaryError {
    message: *mut c_char,
}

impl BoundaryError {
    /// Takes ownership of `message`, which may be NULL.
    ///
    /// # Safety
    /// `message` must be NULL or a string allocated by this library that nothing else frees.
    #[must_use]
    pub unsafe fn from_raw(message: *mut c_char) -> Self {
        Self { message }
    }

    /// The absence of an error.
    #[must_use]
    pub fn none() -> Self {
        Self {
            message: ptr::null_mut(),
        }
    }

    /// An engine-style error carrying `text`.
    #[must_use]
    pub fn from_message(text: &str) -> Self {
        let message = CString::new(text.replace('\0', " "))
            .unwrap_or_default()
            .into_raw();
        Self { message }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        !self.message.is_null()
    }

    /// The error text, or `None` if the operation succeeded.
    #[must_use]
    pub fn message(&self) -> Option<String> {
        if self.message.is_null() {
            return None;
        }
        // SAFETY: non-null messages are NUL-terminated strings owned by this guard.
        let text = unsafe { CStr::from_ptr(self.message) };
        Some(text.to_string_lossy().into_owned())
    }
}

impl Drop for BoundaryError {
    fn drop(&mut self) {
        // SAFETY: the pointer came from this library and is freed only here.
        unsafe { ffi::metering_free_string(self.message) };
        self.message = ptr::null_mut();
    }
}

/// Numeric part of a status query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawStatus {
    /// Seconds since the Unix epoch; zero or less means no success yet.
    pub last_report_success: i64,
    pub current_failure_count: c_int,
    pub total_failure_count: c_int,
}

/// Operations the facade performs against an engine.
pub trait EngineBoundary {
    fn initialize(&self, config: &CStr, state_dir: &CStr) -> (c_int, BoundaryError);

    fn add_report(&self, handle: c_int, report: &CStr) -> BoundaryError;

    fn get_status(&self, handle: c_int) -> (RawStatus, BoundaryError);

    fn shutdown(&self, handle: c_int) -> BoundaryError;
}

/// The in-process engine behind the C functions in [`crate::ffi`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeBoundary;

impl EngineBoundary for NativeBoundary {
    fn initialize(&self, config: &CStr, state_dir: &CStr) -> (c_int, BoundaryError) {
        // SAFETY: both strings are valid for the duration of the call.
        let result = unsafe { ffi::metering_agent_init(config.as_ptr(), state_dir.as_ptr()) };
        // SAFETY: error strings returned by the C functions are owned by the caller.
        (result.id, unsafe { BoundaryError::from_raw(result.error_message) })
    }

    fn add_report(&self, handle: c_int, report: &CStr) -> BoundaryError {
        // SAFETY: as above.
        unsafe {
            let result = ffi::metering_agent_add_report(handle, report.as_ptr());
            BoundaryError::from_raw(result.error_message)
        }
    }

    fn get_status(&self, handle: c_int) -> (RawStatus, BoundaryError) {
        let result = ffi::metering_agent_get_status(handle);
        let status = RawStatus {
            last_report_success: result.last_report_success,
            current_failure_count: result.current_failure_count,
            total_failure_count: result.total_failure_count,
        };
        // SAFETY: as above.
        (status, unsafe { BoundaryError::from_raw(result.error_message) })
    }

    fn shutdown(&self, handle: c_int) -> BoundaryError {
        let result = ffi::metering_agent_shutdown(handle);
        // SAFETY: as above.
        unsafe { BoundaryError::from_raw(result.error_message) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_is_not_an_error() {
        let error = BoundaryError::none();
        assert!(!error.is_error());
        assert_eq!(error.message(), None);
    }

    #[test]
    fn test_message_is_readable_until_drop() {
        let error = BoundaryError::from_message("Agent does not exist");
        assert!(error.is_error());
        assert_eq!(error.message().as_deref(), Some("Agent does not exist"));
        assert_eq!(error.message().as_deref(), Some("Agent does not exist"));
    }

    #[test]
    fn test_native_boundary_unknown_handle() {
        let boundary = NativeBoundary;
        let report = CString::new("{}").unwrap();
        let error = boundary.add_report(-1, &report);
        assert_eq!(error.message().as_deref(), Some("Agent does not exist"));
        let (status, error) = boundary.get_status(-1);
        assert_eq!(status, RawStatus::default());
        assert!(error.is_error());
    }
}
