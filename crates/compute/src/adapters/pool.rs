use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use tracing::{debug, info, warn};

use fractal_core::{AdapterKind, Task, TaskId};

use super::{execute_task, CompletedTask, QueueAdapter};
use crate::program::{ComputeError, ProgramRegistry};

/// Runs tasks on a dedicated rayon thread pool.
///
/// Workers report back over a channel; `collect` drains whatever has
/// arrived without blocking.
pub struct PoolAdapter {
    pool: rayon::ThreadPool,
    programs: Arc<ProgramRegistry>,
    workers: usize,
    tx: Sender<(TaskId, CompletedTask)>,
    rx: Receiver<(TaskId, CompletedTask)>,
    /// Submitted, result not yet received.
    pending: HashSet<TaskId>,
    /// Received, not yet collected.
    ready: HashMap<TaskId, CompletedTask>,
    cancelled: Arc<AtomicBool>,
}

impl PoolAdapter {
    pub fn new(workers: usize, programs: Arc<ProgramRegistry>) -> Result<Self, ComputeError> {
        let workers = workers.max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("fractal-pool-{i}"))
            .build()
            .map_err(|e| ComputeError::Adapter(format!("failed to build thread pool: {e}")))?;
        let (tx, rx) = mpsc::channel();

        Ok(Self {
            pool,
            programs,
            workers,
            tx,
            rx,
            pending: HashSet::new(),
            ready: HashMap::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
        })
    }

    fn receive(&mut self, id: TaskId, done: CompletedTask) {
        if self.pending.remove(&id) {
            self.ready.insert(id, done);
        }
    }
}

impl QueueAdapter for PoolAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Pool
    }

    fn programs(&self) -> BTreeSet<String> {
        self.programs.names()
    }

    fn submit(&mut self, task: Task) -> TaskId {
        let id = task.id;
        if self.cancelled.load(Ordering::Relaxed) {
            warn!(task = %id, "submit on closed pool adapter ignored");
            return id;
        }
        self.pending.insert(id);

        let programs = Arc::clone(&self.programs);
        let cancelled = Arc::clone(&self.cancelled);
        let tx = self.tx.clone();
        self.pool.spawn(move || {
            if cancelled.load(Ordering::Relaxed) {
                return;
            }
            let done = execute_task(&programs, &task);
            debug!(task = %task.id, program = %task.program, elapsed = ?done.wall_time, "task executed");
            // The receiver only goes away with the adapter itself.
            let _ = tx.send((task.id, done));
        });
        id
    }

    fn collect(&mut self) -> HashMap<TaskId, CompletedTask> {
        while let Ok((id, done)) = self.rx.try_recv() {
            self.receive(id, done);
        }
        std::mem::take(&mut self.ready)
    }

    fn await_results(&mut self) {
        while !self.pending.is_empty() {
            match self.rx.recv() {
                Ok((id, done)) => self.receive(id, done),
                Err(_) => break,
            }
        }
    }

    fn count_running(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn close(&mut self) {
        self.cancelled.store(true, Ordering::Relaxed);
        let dropped = self.pending.len() + self.ready.len();
        self.pending.clear();
        self.ready.clear();
        info!(dropped, "pool adapter closed");
    }
}

impl std::fmt::Debug for PoolAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolAdapter")
            .field("workers", &self.workers)
            .field("pending", &self.pending.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}
