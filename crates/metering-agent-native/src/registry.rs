//! Process-wide table of live agents, keyed by the integer handle given to the host.

use std::collections::HashMap;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use lazy_static::lazy_static;
use metering_agent::{Agent, AgentError, Snapshot};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info};

/// The handle value that never identifies an agent.
pub const UNASSIGNED_HANDLE: c_int = -1;

lazy_static! {
    static ref AGENTS: RwLock<HashMap<c_int, Arc<NativeAgent>>> = RwLock::new(HashMap::new());
}

static NEXT_HANDLE: AtomicI32 = AtomicI32::new(0);

/// An engine agent together with the runtime its tasks run on.
pub struct NativeAgent {
    agent: Agent,
    runtime: Runtime,
}

impl NativeAgent {
    fn start(config: &str, state_dir: &str) -> Result<Self, AgentError> {
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .thread_name("metering-agent")
            .build()?;
        let agent = runtime.block_on(Agent::start(config, state_dir))?;
        Ok(Self { agent, runtime })
    }

    /// Queues a JSON report. Does not wait for delivery.
    pub fn add_report(&self, report: &str) -> Result<(), AgentError> {
        self.runtime.block_on(self.agent.add_report_json(report))
    }

    #[must_use]
    pub fn status(&self) -> Snapshot {
        self.agent.status()
    }

    fn shutdown(&self) -> Result<(), AgentError> {
        self.runtime.block_on(self.agent.shutdown())
    }
}

/// Starts an agent and registers it under a fresh handle. Handles are never reused.
pub fn register(config: &str, state_dir: &str) -> Result<c_int, AgentError> {
    let agent = NativeAgent::start(config, state_dir)?;
    let handle = NEXT_HANDLE.fetch_add(1, Ordering::SeqCst);
    AGENTS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(handle, Arc::new(agent));
    info!("Registered metering agent {handle}");
    Ok(handle)
}

/// Looks up a live agent. The registry lock is released before the caller uses it.
#[must_use]
pub fn get(handle: c_int) -> Option<Arc<NativeAgent>> {
    AGENTS
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&handle)
        .cloned()
}

/// Removes the agent from the registry and shuts it down. Returns `None` when the handle is
/// not live, so at most one shutdown per handle reaches the engine.
pub fn shutdown(handle: c_int) -> Option<Result<(), AgentError>> {
    let agent = AGENTS
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&handle)?;
    debug!("Shutting down metering agent {handle}");
    Some(agent.shutdown())
}

#[cfg(test)]
pub(crate) fn is_registered(handle: c_int) -> bool {
    get(handle).is_some()
}
