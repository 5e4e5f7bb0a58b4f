//! Execution backends behind one submit/collect/await contract.
//!
//! - `pool`: local rayon thread pool
//! - `runtime`: tokio runtime with a semaphore-bounded blocking pool
//!
//! The backend is picked once, by [`build_queue_adapter`]; nothing else in
//! the crate branches on which one it got.

mod pool;
mod runtime;

use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use fractal_core::{AdapterKind, ComputeFailure, ManagerConfig, Task, TaskId, TaskOutcome};

use crate::program::{ComputeError, ProgramRegistry};

pub use self::pool::PoolAdapter;
pub use self::runtime::RuntimeAdapter;

/// A task the backend has finished, successfully or not.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedTask {
    pub outcome: TaskOutcome,
    /// Wall time spent executing.
    pub wall_time: Duration,
}

/// Uniform interface over execution backends.
///
/// Only `await_results` blocks; `submit` and `collect` return immediately.
pub trait QueueAdapter: Send {
    fn kind(&self) -> AdapterKind;

    /// Programs this backend can execute.
    fn programs(&self) -> BTreeSet<String>;

    /// Hand a task to the backend. The returned handle is the task id.
    fn submit(&mut self, task: Task) -> TaskId;

    /// Results that are ready now, keyed by handle. Each result is returned once.
    fn collect(&mut self) -> HashMap<TaskId, CompletedTask>;

    /// Block until everything submitted has finished.
    fn await_results(&mut self);

    /// Submitted tasks whose results have not been collected yet.
    fn count_running(&self) -> usize;

    /// Number of workers (cores) the backend executes on.
    fn worker_count(&self) -> usize;

    /// Cancel queued work and release resources. Never fails.
    fn close(&mut self);
}

/// Build the adapter selected by `config.adapter`.
///
/// The runtime adapter must be built from inside a tokio runtime.
pub fn build_queue_adapter(
    config: &ManagerConfig,
    programs: Arc<ProgramRegistry>,
) -> Result<Box<dyn QueueAdapter>, ComputeError> {
    let workers = config.resolved_workers();
    let adapter: Box<dyn QueueAdapter> = match config.adapter {
        AdapterKind::Pool => Box::new(PoolAdapter::new(workers, programs)?),
        AdapterKind::Runtime => Box::new(RuntimeAdapter::from_current(workers, programs)?),
    };
    info!(kind = %adapter.kind(), workers, "queue adapter ready");
    Ok(adapter)
}

/// Run a task through the registry, turning errors and panics into failure outcomes.
pub(crate) fn execute_task(programs: &ProgramRegistry, task: &Task) -> CompletedTask {
    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| programs.execute(task)));
    let outcome = match result {
        Ok(Ok(return_value)) => TaskOutcome::Success { return_value },
        Ok(Err(e)) => TaskOutcome::Failure(ComputeFailure::new(e.error_type(), e.to_string())),
        Err(panic) => TaskOutcome::Failure(ComputeFailure::new("panic", panic_message(&*panic))),
    };
    CompletedTask {
        outcome,
        wall_time: start.elapsed(),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "program panicked".to_string()
    }
}

/// Push `count` echo tasks through an idle adapter and check every one comes back intact.
pub fn adapter_self_test(adapter: &mut dyn QueueAdapter, count: usize) -> bool {
    if adapter.count_running() > 0 {
        warn!("adapter self-test skipped: adapter is busy");
        return false;
    }

    let mut expected = HashMap::new();
    for index in 0..count {
        let payload = json!({ "self_test": index });
        let task = Task {
            id: TaskId::new(),
            program: "echo".into(),
            tag: None,
            payload: payload.clone(),
        };
        expected.insert(adapter.submit(task), payload);
    }

    adapter.await_results();
    let results = adapter.collect();

    let passed = expected.iter().all(|(id, payload)| {
        matches!(
            results.get(id),
            Some(CompletedTask { outcome: TaskOutcome::Success { return_value }, .. }) if return_value == payload
        )
    });

    if passed {
        info!(kind = %adapter.kind(), tasks = count, "adapter self-test passed");
    } else {
        warn!(kind = %adapter.kind(), tasks = count, "adapter self-test failed");
    }
    passed
}
