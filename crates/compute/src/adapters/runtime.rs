use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fractal_core::{AdapterKind, Task, TaskId};

use super::{execute_task, CompletedTask, QueueAdapter};
use crate::program::{ComputeError, ProgramRegistry};

/// Runs tasks on a tokio runtime's blocking pool.
///
/// Concurrency is capped by a semaphore sized to `workers`. Closing the
/// semaphore is how queued work gets cancelled.
pub struct RuntimeAdapter {
    handle: Handle,
    permits: Arc<Semaphore>,
    programs: Arc<ProgramRegistry>,
    workers: usize,
    tx: Sender<(TaskId, CompletedTask)>,
    rx: Receiver<(TaskId, CompletedTask)>,
    jobs: HashMap<TaskId, JoinHandle<()>>,
    ready: HashMap<TaskId, CompletedTask>,
}

impl RuntimeAdapter {
    pub fn new(handle: Handle, workers: usize, programs: Arc<ProgramRegistry>) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel();
        Self {
            handle,
            permits: Arc::new(Semaphore::new(workers)),
            programs,
            workers,
            tx,
            rx,
            jobs: HashMap::new(),
            ready: HashMap::new(),
        }
    }

    /// Adapter on the runtime the caller is running in.
    pub fn from_current(workers: usize, programs: Arc<ProgramRegistry>) -> Result<Self, ComputeError> {
        let handle = Handle::try_current()
            .map_err(|e| ComputeError::Adapter(format!("runtime adapter needs a tokio runtime: {e}")))?;
        Ok(Self::new(handle, workers, programs))
    }

    fn receive(&mut self, id: TaskId, done: CompletedTask) {
        if self.jobs.remove(&id).is_some() {
            self.ready.insert(id, done);
        }
    }
}

impl QueueAdapter for RuntimeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Runtime
    }

    fn programs(&self) -> BTreeSet<String> {
        self.programs.names()
    }

    fn submit(&mut self, task: Task) -> TaskId {
        let id = task.id;
        if self.permits.is_closed() {
            warn!(task = %id, "submit on closed runtime adapter ignored");
            return id;
        }

        let handle = self.handle.clone();
        let permits = Arc::clone(&self.permits);
        let programs = Arc::clone(&self.programs);
        let tx = self.tx.clone();
        let job = self.handle.spawn_blocking(move || {
            // Blocking-pool threads may drive a future to completion.
            let Ok(_permit) = handle.block_on(permits.acquire_owned()) else {
                return;
            };
            let done = execute_task(&programs, &task);
            debug!(task = %task.id, program = %task.program, elapsed = ?done.wall_time, "task executed");
            let _ = tx.send((task.id, done));
        });
        self.jobs.insert(id, job);
        id
    }

    fn collect(&mut self) -> HashMap<TaskId, CompletedTask> {
        while let Ok((id, done)) = self.rx.try_recv() {
            self.receive(id, done);
        }
        std::mem::take(&mut self.ready)
    }

    fn await_results(&mut self) {
        while !self.jobs.is_empty() {
            match self.rx.recv() {
                Ok((id, done)) => self.receive(id, done),
                Err(_) => break,
            }
        }
    }

    fn count_running(&self) -> usize {
        self.jobs.len() + self.ready.len()
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn close(&mut self) {
        self.permits.close();
        let dropped = self.jobs.len() + self.ready.len();
        for (_, job) in self.jobs.drain() {
            job.abort();
        }
        self.ready.clear();
        info!(dropped, "runtime adapter closed");
    }
}

impl std::fmt::Debug for RuntimeAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeAdapter")
            .field("workers", &self.workers)
            .field("jobs", &self.jobs.len())
            .field("ready", &self.ready.len())
            .finish()
    }
}
