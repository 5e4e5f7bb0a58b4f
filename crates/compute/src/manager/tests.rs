use std::sync::Arc;

use serde_json::json;

use fractal_core::{HeartbeatConfig, ManagerConfig, ManagerStatus, TaskSpec, TaskStatus};
use fractal_queue::{FractalServer, LocalClient};

use super::{ManagerState, QueueManager, TaskState};
use crate::adapters::PoolAdapter;
use crate::program::ProgramRegistry;

struct Harness {
    server: Arc<FractalServer>,
    client: Arc<LocalClient>,
}

impl Harness {
    fn new() -> Self {
        let server = Arc::new(FractalServer::new(HeartbeatConfig::default()));
        let client = Arc::new(LocalClient::new(Arc::clone(&server)));
        Self { server, client }
    }

    fn manager(&self, config: ManagerConfig) -> QueueManager {
        let adapter = PoolAdapter::new(2, Arc::new(ProgramRegistry::with_builtins())).unwrap();
        QueueManager::new(self.client.clone(), Box::new(adapter), config).unwrap()
    }

    fn submit(&self, n: usize) -> Vec<fractal_core::TaskId> {
        self.server
            .submit_tasks((0..n).map(|i| TaskSpec::new("echo", json!({"i": i}))).collect())
    }
}

#[test]
fn update_claims_and_tracks_submitted_tasks() {
    let h = Harness::new();
    let ids = h.submit(3);
    let mut manager = h.manager(ManagerConfig::default());

    let report = manager.update();
    assert_eq!(report.claimed, 3);
    assert!(report.heartbeat_ok);
    assert_eq!(manager.list_current_tasks().len(), 3);
    assert_eq!(manager.task_state(&ids[0]), Some(TaskState::Submitted));
    assert_eq!(h.server.task_counts().running, 3);

    assert!(manager.await_results());
    assert!(manager.list_current_tasks().is_empty());
    assert_eq!(manager.task_state(&ids[0]), None);
    assert_eq!(h.server.task_counts().complete, 3);
    assert_eq!(manager.statistics().completed, 3);
}

#[test]
fn capacity_limits_claims() {
    let h = Harness::new();
    h.server
        .submit_tasks((0..5).map(|_| TaskSpec::new("echo", json!({"sleep_ms": 300}))).collect());
    let mut manager = h.manager(ManagerConfig {
        max_tasks: 2,
        ..ManagerConfig::default()
    });

    assert_eq!(manager.update().claimed, 2);
    // Full: nothing more until something finishes.
    assert_eq!(manager.update().claimed, 0);
    assert_eq!(h.server.task_counts().waiting, 3);
}

#[test]
fn capacity_counts_each_held_task_once() {
    let h = Harness::new();
    let slow = || TaskSpec::new("echo", json!({"sleep_ms": 500}));
    h.server.submit_tasks(vec![slow(), slow()]);
    let mut manager = h.manager(ManagerConfig {
        max_tasks: 3,
        ..ManagerConfig::default()
    });

    assert_eq!(manager.update().claimed, 2);
    assert_eq!(manager.adapter().count_running(), 2);

    h.server.submit_tasks(vec![slow(), slow(), slow()]);
    // Two held tasks leave room for exactly one more.
    assert_eq!(manager.update().claimed, 1);
    assert_eq!(manager.list_current_tasks().len(), 3);
    assert_eq!(h.server.task_counts().waiting, 2);
}

#[test]
fn huge_max_tasks_is_clamped() {
    let h = Harness::new();
    let manager = h.manager(ManagerConfig {
        max_tasks: 1_000_000_000,
        ..ManagerConfig::default()
    });
    assert!(manager.max_tasks() < 1_000_000_000);
    assert_eq!(manager.max_tasks(), fractal_core::MAX_TASKS_CEILING);
}

#[test]
fn zero_retries_goes_straight_to_stale() {
    let h = Harness::new();
    let ids = h.submit(1);
    let mut manager = h.manager(ManagerConfig {
        server_error_retries: 0,
        ..ManagerConfig::default()
    });

    manager.update();
    manager.adapter_mut().await_results();
    h.client.set_network_error(true);
    let report = manager.update();

    assert_eq!(report.newly_stale, 1);
    assert_eq!(manager.stale_payload_count(), 0);
    assert_eq!(manager.n_stale_jobs(), 1);
    assert_eq!(manager.task_state(&ids[0]), None);
}

#[test]
fn stale_results_retry_until_promoted() {
    let h = Harness::new();
    let ids = h.submit(1);
    let mut manager = h.manager(ManagerConfig {
        server_error_retries: 2,
        ..ManagerConfig::default()
    });

    manager.update();
    manager.adapter_mut().await_results();
    h.client.set_network_error(true);

    manager.update();
    assert_eq!(manager.task_state(&ids[0]), Some(TaskState::LocalComplete));
    assert_eq!((manager.stale_payload_count(), manager.n_stale_jobs()), (1, 0));

    manager.update();
    assert_eq!((manager.stale_payload_count(), manager.n_stale_jobs()), (1, 0));

    let report = manager.update();
    assert_eq!(report.promoted_stale, 1);
    assert_eq!((manager.stale_payload_count(), manager.n_stale_jobs()), (0, 1));
}

#[test]
fn failed_program_counts_as_failed() {
    let h = Harness::new();
    let ids = h
        .server
        .submit_tasks(vec![TaskSpec::new("echo", json!({"fail": "geometry exploded"}))]);
    let mut manager = h.manager(ManagerConfig::default());

    assert!(manager.await_results());
    assert_eq!(h.server.store().get(&ids[0]).unwrap().status, TaskStatus::Error);
    let record = &h.server.list_managers(Some(manager.name()))[0];
    assert_eq!((record.submitted, record.completed, record.failed), (1, 0, 1));
    assert_eq!(manager.statistics().failed, 1);
}

#[test]
fn shutdown_is_terminal_and_idempotent() {
    let h = Harness::new();
    let mut manager = h.manager(ManagerConfig::default());

    let first = manager.shutdown().unwrap();
    assert_eq!(first.nshutdown, 0);
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert_eq!(
        h.server.list_managers(Some(manager.name()))[0].status,
        ManagerStatus::Inactive
    );

    assert_eq!(manager.shutdown().unwrap().nshutdown, 0);
    h.submit(1);
    assert_eq!(manager.update().claimed, 0);
    assert!(!manager.await_results());
}

#[test]
fn shutdown_after_sweep_reports_zero() {
    let h = Harness::new();
    let mut manager = h.manager(ManagerConfig::default());
    h.server.deactivate_manager(manager.name()).unwrap();

    let report = manager.shutdown().unwrap();
    assert_eq!(report.nshutdown, 0);
    assert_eq!(manager.state(), ManagerState::Stopped);
}

#[test]
fn shutdown_surfaces_network_errors() {
    let h = Harness::new();
    let mut manager = h.manager(ManagerConfig::default());
    h.client.set_network_error(true);

    assert!(manager.shutdown().unwrap_err().is_transient());
    assert_eq!(manager.state(), ManagerState::ShuttingDown);
}

#[test]
fn shutdown_retries_deactivation_after_outage() {
    let h = Harness::new();
    let ids = h
        .server
        .submit_tasks(vec![TaskSpec::new("echo", json!({"sleep_ms": 500}))]);
    let mut manager = h.manager(ManagerConfig::default());
    assert_eq!(manager.update().claimed, 1);

    h.client.set_network_error(true);
    assert!(manager.shutdown().is_err());
    assert_eq!(manager.state(), ManagerState::ShuttingDown);
    // No new work while shutting down.
    assert_eq!(manager.update().claimed, 0);

    h.client.set_network_error(false);
    let report = manager.shutdown().unwrap();
    assert_eq!(report.nshutdown, 1);
    assert_eq!(manager.state(), ManagerState::Stopped);
    assert_eq!(
        h.server.list_managers(Some(manager.name()))[0].status,
        ManagerStatus::Inactive
    );
    assert_eq!(h.server.store().get(&ids[0]).unwrap().status, TaskStatus::Waiting);
}

#[test]
fn self_test_requires_idle_manager() {
    let h = Harness::new();
    h.submit(1);
    let mut manager = h.manager(ManagerConfig::default());
    assert!(manager.test());

    manager.update();
    assert!(!manager.test());
}
