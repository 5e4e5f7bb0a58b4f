//! Queue manager: claims tasks from the server, runs them on a queue
//! adapter, and pushes results back.
//!
//! Split into focused submodules:
//! - `core`: QueueManager struct, registration, and accessors
//! - `update`: the single synchronous update cycle and stale-result tracking
//! - `lifecycle`: draining, shutdown, and adapter self-test

mod core;
mod lifecycle;
mod update;
#[cfg(test)]
mod tests;

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use fractal_core::{Task, TaskOutcome};

pub use self::core::QueueManager;

/// Upper bound on flush cycles in `await_results`, so a dead server cannot spin forever.
pub const MAX_DRAIN_CYCLES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerState {
    Active,
    ShuttingDown,
    Stopped,
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Active => write!(f, "ACTIVE"),
            ManagerState::ShuttingDown => write!(f, "SHUTTING_DOWN"),
            ManagerState::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Where a task is in the manager's hands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Claimed from the server, not yet handed to the adapter.
    Claimed,
    /// Executing (or queued) in the adapter.
    Submitted,
    /// Finished locally, result not yet accepted by the server.
    LocalComplete,
    /// The server acknowledged the result.
    Confirmed,
}

/// A task the manager currently holds.
#[derive(Debug, Clone)]
pub struct TrackedTask {
    pub task: Task,
    pub state: TaskState,
    pub claimed_at: DateTime<Utc>,
}

/// A finished result the server has not acknowledged yet.
#[derive(Debug, Clone)]
pub struct StalePayload {
    pub outcome: TaskOutcome,
    pub wall_time: Duration,
    /// Failed retry pushes so far.
    pub attempts: u32,
}

/// What one `update()` cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub claimed: usize,
    pub collected: usize,
    /// Results the server accepted or already had.
    pub confirmed: usize,
    pub rejected: usize,
    /// Results that entered stale tracking this cycle.
    pub newly_stale: usize,
    /// Tracked payloads given up on this cycle.
    pub promoted_stale: usize,
    pub heartbeat_ok: bool,
}

/// Returned by `shutdown()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Tasks the server returned to WAITING.
    pub nshutdown: usize,
    /// Results that never reached the server.
    pub nstale: usize,
}
