//! # Metering Agent Native
//!
//! Embeds the metering agent in a host process.
//!
//! - [`ffi`]: `extern "C"` functions keyed by integer agent handles, with a generated C header
//!   (`metering_agent_native.h`)
//! - [`facade`]: [`AgentFacade`], a Rust owner of one agent handle that frees every error
//!   message crossing the boundary and shuts the agent down when dropped
//! - [`boundary`]: the operations the facade needs from an engine

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

pub mod boundary;
pub mod facade;

/// C-compatible agent lifecycle functions
pub mod ffi;

/// Log formatting for embedded agents
pub mod logger;

pub mod registry;

pub use boundary::{BoundaryError, EngineBoundary, NativeBoundary, RawStatus};
pub use facade::{AgentFacade, AgentStatus, FacadeError};
