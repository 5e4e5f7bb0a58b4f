//! Server side of task distribution: the task table, the manager registry,
//! and the heartbeat monitor that reclaims work from silent managers.

pub mod client;
pub mod monitor;
pub mod registry;
pub mod server;
pub mod store;

pub use client::LocalClient;
pub use monitor::HeartbeatMonitor;
pub use registry::{ManagerFilter, ManagerRegistry};
pub use server::{FractalServer, SweepReport};
pub use store::{CompletionReport, StatusCounts, TaskStore};
