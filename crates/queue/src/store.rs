//! Server-side task table.
//!
//! Tasks are kept in submission order so claims hand out the oldest waiting
//! work first, and a task returned to the pool keeps its place in line.
//! Every operation runs inside one critical section, which is what makes a
//! claim atomic: two managers can never both move the same task to RUNNING.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;

use fractal_core::{CompletionAck, Task, TaskId, TaskOutcome, TaskRecord, TaskSpec, TaskStatus};

/// Outcome of a `complete` call, with the counter deltas for the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    pub ack: CompletionAck,
    pub completed: u64,
    pub failed: u64,
}

/// Number of tasks in each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub waiting: usize,
    pub running: usize,
    pub complete: usize,
    pub error: usize,
}

impl StatusCounts {
    /// Tasks that still need a manager to finish them.
    pub fn outstanding(&self) -> usize {
        self.waiting + self.running
    }
}

#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: Mutex<IndexMap<TaskId, TaskRecord>>,
}

impl TaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<TaskId, TaskRecord>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a task in the WAITING state.
    pub fn submit(&self, spec: TaskSpec) -> TaskId {
        let record = TaskRecord::new(spec);
        let id = record.id;
        debug!(task_id = %id, program = %record.spec.program, "task submitted");
        self.lock().insert(id, record);
        id
    }

    pub fn submit_many(&self, specs: impl IntoIterator<Item = TaskSpec>) -> Vec<TaskId> {
        let mut tasks = self.lock();
        specs
            .into_iter()
            .map(|spec| {
                let record = TaskRecord::new(spec);
                let id = record.id;
                tasks.insert(id, record);
                id
            })
            .collect()
    }

    /// Move up to `limit` matching WAITING tasks to RUNNING under `manager`.
    ///
    /// `tag == None` matches any task tag; a concrete tag matches only tasks
    /// carrying exactly that tag. The task's program must be in `programs`.
    pub fn claim(
        &self,
        manager: &str,
        tag: Option<&str>,
        programs: &BTreeSet<String>,
        limit: usize,
    ) -> Vec<Task> {
        if limit == 0 {
            return Vec::new();
        }

        let now = Utc::now();
        let mut tasks = self.lock();
        let mut claimed = Vec::new();

        for record in tasks.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if record.status != TaskStatus::Waiting {
                continue;
            }
            if let Some(tag) = tag {
                if record.spec.tag.as_deref() != Some(tag) {
                    continue;
                }
            }
            if !programs.contains(&record.spec.program) {
                continue;
            }

            record.status = TaskStatus::Running;
            record.claimed_by = Some(manager.to_string());
            record.claimed_at = Some(now);
            claimed.push(record.to_task());
        }

        claimed
    }

    /// Record results pushed by `manager`.
    ///
    /// Results for tasks already COMPLETE/ERROR are duplicates and change
    /// nothing. Results for tasks `manager` does not hold are rejected.
    pub fn complete(&self, manager: &str, results: &[(TaskId, TaskOutcome)]) -> CompletionReport {
        let now = Utc::now();
        let mut tasks = self.lock();
        let mut report = CompletionReport::default();

        for (id, outcome) in results {
            let Some(record) = tasks.get_mut(id) else {
                report.ack.rejected.push(*id);
                continue;
            };

            if record.status.is_terminal() {
                report.ack.duplicates.push(*id);
                continue;
            }

            if record.status != TaskStatus::Running || record.claimed_by.as_deref() != Some(manager) {
                report.ack.rejected.push(*id);
                continue;
            }

            record.status = outcome.final_status();
            record.outcome = Some(outcome.clone());
            record.claimed_by = None;
            record.completed_by = Some(manager.to_string());
            record.completed_at = Some(now);

            if outcome.is_success() {
                report.completed += 1;
            } else {
                report.failed += 1;
            }
            report.ack.accepted.push(*id);
        }

        report
    }

    /// Return every RUNNING task owned by `manager` to WAITING.
    pub fn release_by_manager(&self, manager: &str) -> usize {
        let mut tasks = self.lock();
        let mut released = 0;
        for record in tasks.values_mut() {
            if record.status == TaskStatus::Running && record.claimed_by.as_deref() == Some(manager) {
                record.status = TaskStatus::Waiting;
                record.claimed_by = None;
                record.claimed_at = None;
                released += 1;
            }
        }
        released
    }

    pub fn get(&self, id: &TaskId) -> Option<TaskRecord> {
        self.lock().get(id).cloned()
    }

    /// All tasks, or only those in `status`, in submission order.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        self.lock()
            .values()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .cloned()
            .collect()
    }

    /// Successfully completed records.
    pub fn query_results(&self) -> Vec<TaskRecord> {
        self.list(Some(TaskStatus::Complete))
    }

    /// Tasks currently held by `manager`.
    pub fn claimed_by(&self, manager: &str) -> Vec<TaskId> {
        self.lock()
            .values()
            .filter(|r| r.status == TaskStatus::Running && r.claimed_by.as_deref() == Some(manager))
            .map(|r| r.id)
            .collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let tasks = self.lock();
        let mut counts = StatusCounts::default();
        for record in tasks.values() {
            match record.status {
                TaskStatus::Waiting => counts.waiting += 1,
                TaskStatus::Running => counts.running += 1,
                TaskStatus::Complete => counts.complete += 1,
                TaskStatus::Error => counts.error += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}
