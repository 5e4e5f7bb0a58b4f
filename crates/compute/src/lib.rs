//! Client side of the task queue: programs, queue adapters, and the
//! queue manager that connects them to a server.

pub mod adapters;
pub mod manager;
pub mod program;
pub mod runner;
pub mod stats;

pub use adapters::{
    adapter_self_test, build_queue_adapter, CompletedTask, PoolAdapter, QueueAdapter, RuntimeAdapter,
};
pub use manager::{
    ManagerState, QueueManager, ShutdownReport, StalePayload, TaskState, TrackedTask, UpdateReport,
};
pub use program::{ComputeError, EchoProgram, Program, ProgramRegistry};
pub use runner::{ManagerRunner, RunSummary};
pub use stats::{CoreUsage, ManagerStatistics};
