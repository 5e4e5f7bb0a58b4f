use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use indexmap::IndexMap;
use tracing::{info, warn};

use fractal_core::{FractalClient, FractalError, ManagerConfig, ManagerRegistration, TaskId};

use super::{ManagerState, StalePayload, TaskState, TrackedTask};
use crate::adapters::QueueAdapter;
use crate::stats::ManagerStatistics;

/// Pulls tasks from a server and executes them on a [`QueueAdapter`].
///
/// All mutation goes through `&mut self`, so one manager never runs two
/// update cycles at once.
pub struct QueueManager {
    pub(super) client: Arc<dyn FractalClient>,
    pub(super) adapter: Box<dyn QueueAdapter>,
    pub(super) config: ManagerConfig,
    pub(super) name: String,
    /// Capabilities advertised on every claim.
    pub(super) programs: BTreeSet<String>,
    pub(super) max_tasks: usize,
    pub(super) state: ManagerState,
    /// Claimed or submitted, in claim order.
    pub(super) current_tasks: IndexMap<TaskId, TrackedTask>,
    /// Finished results awaiting a successful push.
    pub(super) stale_payloads: IndexMap<TaskId, StalePayload>,
    /// Results given up on after exhausting retries.
    pub(super) n_stale_jobs: usize,
    pub(super) statistics: ManagerStatistics,
    pub(super) cycles: u64,
}

impl QueueManager {
    /// Register with the server and return a ready manager.
    pub fn new(
        client: Arc<dyn FractalClient>,
        adapter: Box<dyn QueueAdapter>,
        config: ManagerConfig,
    ) -> Result<Self, FractalError> {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        let programs = adapter.programs();

        let mut registration = ManagerRegistration::new(config.cluster.clone(), hostname);
        registration.tags.extend(config.queue_tag.clone());
        registration.programs = programs.clone();
        registration.username = config.username.clone().or_else(|| client.username());

        let name = client.register_manager(&registration)?;

        let max_tasks = config.clamped_max_tasks();
        if max_tasks < config.max_tasks {
            warn!(
                manager = %name,
                requested = config.max_tasks,
                max_tasks,
                "max_tasks clamped"
            );
        }

        info!(
            manager = %name,
            tag = config.queue_tag.as_deref().unwrap_or("*"),
            adapter = %adapter.kind(),
            workers = adapter.worker_count(),
            max_tasks,
            "queue manager registered"
        );

        let statistics = ManagerStatistics::new(adapter.worker_count(), Utc::now());
        Ok(Self {
            client,
            adapter,
            config,
            name,
            programs,
            max_tasks,
            state: ManagerState::Active,
            current_tasks: IndexMap::new(),
            stale_payloads: IndexMap::new(),
            n_stale_jobs: 0,
            statistics,
            cycles: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ManagerState {
        self.state
    }

    pub fn max_tasks(&self) -> usize {
        self.max_tasks
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn programs(&self) -> &BTreeSet<String> {
        &self.programs
    }

    /// Tasks claimed or submitted and not yet finished, in claim order.
    pub fn list_current_tasks(&self) -> Vec<TrackedTask> {
        self.current_tasks.values().cloned().collect()
    }

    /// Local state of a task this manager still holds.
    pub fn task_state(&self, id: &TaskId) -> Option<TaskState> {
        if let Some(tracked) = self.current_tasks.get(id) {
            return Some(tracked.state);
        }
        self.stale_payloads
            .contains_key(id)
            .then_some(TaskState::LocalComplete)
    }

    /// Results abandoned after exhausting retries.
    pub fn n_stale_jobs(&self) -> usize {
        self.n_stale_jobs
    }

    /// Results still being retried.
    pub fn stale_payload_count(&self) -> usize {
        self.stale_payloads.len()
    }

    pub fn statistics(&self) -> &ManagerStatistics {
        &self.statistics
    }

    /// Completed update cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn adapter(&self) -> &dyn QueueAdapter {
        self.adapter.as_ref()
    }

    /// Mutable adapter access, e.g. to block on it directly.
    pub fn adapter_mut(&mut self) -> &mut dyn QueueAdapter {
        self.adapter.as_mut()
    }
}

impl std::fmt::Debug for QueueManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueManager")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("current_tasks", &self.current_tasks.len())
            .field("stale_payloads", &self.stale_payloads.len())
            .field("n_stale_jobs", &self.n_stale_jobs)
            .finish()
    }
}
