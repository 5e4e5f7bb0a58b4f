//! The server facade: one task store plus one manager registry.
//!
//! All cross-table rules live here. A claim runs while the registry lock is
//! held, so a manager that is being deactivated can never pick up work that
//! would then be orphaned in RUNNING.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use fractal_core::{
    CompletionAck, FractalError, HeartbeatConfig, ManagerRecord, ManagerRegistration, Task, TaskId,
    TaskOutcome, TaskRecord, TaskSpec,
};

use crate::registry::{ManagerFilter, ManagerRegistry};
use crate::store::{StatusCounts, TaskStore};

/// Result of one heartbeat sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub deactivated: Vec<String>,
    pub tasks_returned: usize,
}

#[derive(Debug, Default)]
pub struct FractalServer {
    store: TaskStore,
    registry: ManagerRegistry,
    heartbeat: HeartbeatConfig,
}

impl FractalServer {
    pub fn new(heartbeat: HeartbeatConfig) -> Self {
        Self {
            store: TaskStore::new(),
            registry: ManagerRegistry::new(),
            heartbeat,
        }
    }

    pub fn heartbeat_config(&self) -> &HeartbeatConfig {
        &self.heartbeat
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn registry(&self) -> &ManagerRegistry {
        &self.registry
    }

    // ── Client-facing queries ─────────────────────────────────

    pub fn submit_tasks(&self, specs: Vec<TaskSpec>) -> Vec<TaskId> {
        let ids = self.store.submit_many(specs);
        info!(count = ids.len(), "tasks submitted");
        ids
    }

    pub fn query_results(&self) -> Vec<TaskRecord> {
        self.store.query_results()
    }

    pub fn task_counts(&self) -> StatusCounts {
        self.store.status_counts()
    }

    /// Manager records, optionally restricted to one name.
    pub fn list_managers(&self, name: Option<&str>) -> Vec<ManagerRecord> {
        self.registry.list(&ManagerFilter { name, status: None })
    }

    // ── Manager-facing operations ─────────────────────────────

    pub fn register_manager(&self, registration: &ManagerRegistration) -> String {
        self.registry.register(registration, Utc::now())
    }

    pub fn manager_heartbeat(&self, name: &str) -> Result<(), FractalError> {
        self.registry.heartbeat(name, Utc::now())
    }

    pub fn claim_tasks(
        &self,
        name: &str,
        tag: Option<&str>,
        programs: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Task>, FractalError> {
        let tasks = self.registry.with_active(name, |record| {
            let tasks = self.store.claim(name, tag, programs, limit);
            record.submitted += tasks.len() as u64;
            tasks
        })?;
        if !tasks.is_empty() {
            debug!(manager = %name, count = tasks.len(), "tasks claimed");
        }
        Ok(tasks)
    }

    pub fn complete_tasks(&self, name: &str, results: &[(TaskId, TaskOutcome)]) -> CompletionAck {
        let report = self.store.complete(name, results);
        self.registry.record_completed(name, report.completed, report.failed);

        if !report.ack.rejected.is_empty() {
            warn!(
                manager = %name,
                rejected = report.ack.rejected.len(),
                "results rejected for tasks the manager does not hold"
            );
        }
        debug!(
            manager = %name,
            completed = report.completed,
            failed = report.failed,
            duplicates = report.ack.duplicates.len(),
            "results received"
        );
        report.ack
    }

    /// Mark a manager inactive and hand its RUNNING tasks back to the pool.
    pub fn deactivate_manager(&self, name: &str) -> Result<usize, FractalError> {
        self.registry.deactivate(name)?;
        let returned = self.return_tasks(name);
        info!(manager = %name, returned, "manager shut down");
        Ok(returned)
    }

    fn return_tasks(&self, name: &str) -> usize {
        let returned = self.store.release_by_manager(name);
        self.registry.record_returned(name, returned as u64);
        returned
    }

    // ── Heartbeat sweep ───────────────────────────────────────

    pub fn check_manager_heartbeats(&self) -> SweepReport {
        self.check_manager_heartbeats_at(Utc::now())
    }

    /// Deactivate managers silent for longer than the heartbeat timeout as of `now`.
    pub fn check_manager_heartbeats_at(&self, now: DateTime<Utc>) -> SweepReport {
        let deactivated = self.registry.sweep(now, self.heartbeat.timeout());
        let tasks_returned = deactivated.iter().map(|name| self.return_tasks(name)).sum();

        if !deactivated.is_empty() {
            info!(
                managers = deactivated.len(),
                tasks_returned, "heartbeat sweep deactivated managers"
            );
        }
        SweepReport {
            deactivated,
            tasks_returned,
        }
    }
}

#[cfg(test)]
mod tests {
    use fractal_core::{ManagerStatus, TaskStatus};
    use serde_json::json;

    use super::*;

    fn server() -> FractalServer {
        FractalServer::new(HeartbeatConfig {
            heartbeat_frequency_ms: 1_000,
            max_missed_heartbeats: 2,
            sweep_interval_ms: None,
        })
    }

    fn register(server: &FractalServer, tag: Option<&str>) -> (String, BTreeSet<String>) {
        let mut reg = ManagerRegistration::new("test", "localhost");
        reg.tags.extend(tag.map(str::to_string));
        reg.programs.insert("echo".into());
        (server.register_manager(&reg), reg.programs)
    }

    fn success() -> TaskOutcome {
        TaskOutcome::Success { return_value: json!(1) }
    }

    #[test]
    fn claim_counts_submitted_and_complete_counts_completed() {
        let server = server();
        let ids = server.submit_tasks(vec![TaskSpec::new("echo", json!({})).with_tag("other")]);
        let (name, programs) = register(&server, Some("other"));

        let tasks = server.claim_tasks(&name, Some("other"), &programs, 10).unwrap();
        assert_eq!(tasks.len(), 1);
        let ack = server.complete_tasks(&name, &[(ids[0], success())]);
        assert_eq!(ack.accepted, ids);

        // Re-pushing after a lost acknowledgement changes nothing.
        server.complete_tasks(&name, &[(ids[0], success())]);
        let record = &server.list_managers(Some(&name))[0];
        assert_eq!((record.submitted, record.completed, record.failed), (1, 1, 0));
        assert_eq!(server.query_results().len(), 1);
    }

    #[test]
    fn inactive_manager_cannot_claim() {
        let server = server();
        server.submit_tasks(vec![TaskSpec::new("echo", json!({}))]);
        let (name, programs) = register(&server, None);
        server.deactivate_manager(&name).unwrap();

        let err = server.claim_tasks(&name, None, &programs, 1).unwrap_err();
        assert!(matches!(err, FractalError::UnknownManager(_)));
        assert_eq!(server.task_counts().waiting, 1);
    }

    #[test]
    fn deactivate_returns_running_tasks() {
        let server = server();
        server.submit_tasks((0..3).map(|_| TaskSpec::new("echo", json!({}))).collect());
        let (name, programs) = register(&server, None);
        server.claim_tasks(&name, None, &programs, 2).unwrap();

        assert_eq!(server.deactivate_manager(&name).unwrap(), 2);
        assert_eq!(server.task_counts().waiting, 3);
        let record = &server.list_managers(Some(&name))[0];
        assert_eq!(record.status, ManagerStatus::Inactive);
        assert_eq!(record.returned, 2);

        assert!(matches!(
            server.deactivate_manager(&name),
            Err(FractalError::UnknownManager(_))
        ));
    }

    #[test]
    fn sweep_returns_exactly_the_silent_managers_tasks() {
        let server = server();
        let ids = server.submit_tasks((0..4).map(|_| TaskSpec::new("echo", json!({}))).collect());
        let (silent, programs) = register(&server, None);
        let (alive, _) = register(&server, None);
        server.claim_tasks(&silent, None, &programs, 2).unwrap();
        server.claim_tasks(&alive, None, &programs, 1).unwrap();
        server.complete_tasks(&silent, &[(ids[0], success())]);

        let later = Utc::now() + chrono::Duration::seconds(3);
        server.registry().heartbeat(&alive, later).unwrap();

        let report = server.check_manager_heartbeats_at(later);
        assert_eq!(report.deactivated, vec![silent.clone()]);
        assert_eq!(report.tasks_returned, 1);
        assert_eq!(server.store().get(&ids[0]).unwrap().status, TaskStatus::Complete);
        assert_eq!(server.store().get(&ids[1]).unwrap().status, TaskStatus::Waiting);
        assert_eq!(server.store().get(&ids[2]).unwrap().status, TaskStatus::Running);
    }

    #[test]
    fn results_after_release_are_rejected() {
        let server = server();
        let ids = server.submit_tasks(vec![TaskSpec::new("echo", json!({}))]);
        let (name, programs) = register(&server, None);
        server.claim_tasks(&name, None, &programs, 1).unwrap();
        server.deactivate_manager(&name).unwrap();

        let ack = server.complete_tasks(&name, &[(ids[0], success())]);
        assert_eq!(ack.rejected, ids);
        let record = &server.list_managers(Some(&name))[0];
        assert!(record.completed + record.failed <= record.submitted);
    }
}
