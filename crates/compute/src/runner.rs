//! Async driver that polls a [`QueueManager`] until told to stop.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use fractal_core::FractalError;

use crate::manager::{QueueManager, ShutdownReport};
use crate::stats::ManagerStatistics;

/// What a finished run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub manager: String,
    pub cycles: u64,
    pub claimed: usize,
    pub confirmed: usize,
    pub shutdown: ShutdownReport,
    pub statistics: ManagerStatistics,
}

pub struct ManagerRunner;

impl ManagerRunner {
    /// Call `update()` every `update_frequency` until `shutdown` fires or
    /// the process gets SIGINT/SIGTERM, then shut the manager down.
    ///
    /// Each cycle runs on the blocking pool, so the adapter may block
    /// briefly without stalling the runtime.
    pub async fn run(
        manager: QueueManager,
        update_frequency: Duration,
        shutdown: Arc<Notify>,
    ) -> Result<RunSummary, FractalError> {
        let name = manager.name().to_string();
        info!(manager = %name, frequency = ?update_frequency, "manager runner started");

        let mut ticker = tokio::time::interval(update_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let stop = shutdown.notified();
        tokio::pin!(stop);
        let signal = Self::os_signal();
        tokio::pin!(signal);

        let mut manager = manager;
        let mut claimed = 0usize;
        let mut confirmed = 0usize;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let (returned, report) = Self::blocking(manager, |m| m.update()).await?;
                    manager = returned;
                    claimed += report.claimed;
                    confirmed += report.confirmed;
                }
                _ = &mut stop => {
                    debug!(manager = %name, "shutdown requested");
                    break;
                }
                _ = &mut signal => {
                    info!(manager = %name, "shutdown signal received");
                    break;
                }
            }
        }

        let (manager, report) = Self::blocking(manager, |m| m.shutdown()).await?;
        let report = report?;

        let summary = RunSummary {
            manager: name,
            cycles: manager.cycles(),
            claimed,
            confirmed,
            shutdown: report,
            statistics: manager.statistics().clone(),
        };
        info!(
            manager = %summary.manager,
            cycles = summary.cycles,
            claimed,
            confirmed,
            nshutdown = report.nshutdown,
            "manager runner stopped"
        );
        Ok(summary)
    }

    /// Move the manager onto the blocking pool for one call and back.
    ///
    /// If the call panics the manager is dropped without deactivating. Its
    /// RUNNING tasks stay claimed until the server's heartbeat sweep marks
    /// the manager inactive and returns them to WAITING.
    async fn blocking<T, F>(mut manager: QueueManager, f: F) -> Result<(QueueManager, T), FractalError>
    where
        T: Send + 'static,
        F: FnOnce(&mut QueueManager) -> T + Send + 'static,
    {
        let name = manager.name().to_string();
        tokio::task::spawn_blocking(move || {
            let out = f(&mut manager);
            (manager, out)
        })
        .await
        .map_err(|e| {
            error!(
                manager = %name,
                error = %e,
                "manager cycle aborted; claimed tasks left to the heartbeat sweep"
            );
            FractalError::Adapter(format!("manager cycle aborted: {e}"))
        })
    }

    /// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C elsewhere.
    ///
    /// If the handlers cannot be installed this never resolves.
    async fn os_signal() {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                (Ok(mut sigint), Ok(mut sigterm)) => {
                    tokio::select! {
                        _ = sigint.recv() => {}
                        _ = sigterm.recv() => {}
                    }
                }
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "failed to register signal handlers");
                    std::future::pending::<()>().await;
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl_c");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use std::collections::{BTreeSet, HashMap};

    use fractal_core::{
        AdapterKind, HeartbeatConfig, ManagerConfig, ManagerStatus, Task, TaskId, TaskSpec,
    };
    use fractal_queue::{FractalServer, LocalClient};

    use super::*;
    use crate::adapters::{CompletedTask, PoolAdapter, QueueAdapter};
    use crate::program::ProgramRegistry;

    /// Holds every task forever and panics when asked for results.
    #[derive(Default)]
    struct BrokenAdapter {
        held: Vec<TaskId>,
    }

    impl QueueAdapter for BrokenAdapter {
        fn kind(&self) -> AdapterKind {
            AdapterKind::Pool
        }

        fn programs(&self) -> BTreeSet<String> {
            BTreeSet::from(["echo".to_string()])
        }

        fn submit(&mut self, task: Task) -> TaskId {
            self.held.push(task.id);
            task.id
        }

        fn collect(&mut self) -> HashMap<TaskId, CompletedTask> {
            if !self.held.is_empty() {
                panic!("backend lost its workers");
            }
            HashMap::new()
        }

        fn await_results(&mut self) {}

        fn count_running(&self) -> usize {
            self.held.len()
        }

        fn worker_count(&self) -> usize {
            1
        }

        fn close(&mut self) {}
    }

    fn setup() -> (Arc<FractalServer>, QueueManager) {
        let server = Arc::new(FractalServer::new(HeartbeatConfig::default()));
        let client = Arc::new(LocalClient::new(Arc::clone(&server)));
        let adapter = PoolAdapter::new(2, Arc::new(ProgramRegistry::with_builtins())).unwrap();
        let manager = QueueManager::new(client, Box::new(adapter), ManagerConfig::default()).unwrap();
        (server, manager)
    }

    #[tokio::test]
    async fn runs_tasks_until_notified() {
        let (server, manager) = setup();
        server.submit_tasks((0..6).map(|i| TaskSpec::new("echo", json!({"i": i}))).collect());
        let name = manager.name().to_string();

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(ManagerRunner::run(
            manager,
            Duration::from_millis(10),
            Arc::clone(&shutdown),
        ));

        for _ in 0..200 {
            if server.task_counts().outstanding() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        shutdown.notify_one();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(server.task_counts().complete, 6);
        assert_eq!(summary.claimed, 6);
        assert_eq!(summary.confirmed, 6);
        assert_eq!(summary.shutdown.nshutdown, 0);
        assert_eq!(server.list_managers(Some(&name))[0].status, ManagerStatus::Inactive);
    }

    #[tokio::test]
    async fn shutdown_returns_unfinished_work() {
        let (server, manager) = setup();
        server.submit_tasks(vec![TaskSpec::new("echo", json!({"sleep_ms": 500}))]);

        let shutdown = Arc::new(Notify::new());
        let handle = tokio::spawn(ManagerRunner::run(
            manager,
            Duration::from_millis(10),
            Arc::clone(&shutdown),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.notify_one();
        let summary = handle.await.unwrap().unwrap();

        assert_eq!(summary.shutdown.nshutdown, 1);
        assert_eq!(server.task_counts().waiting, 1);
    }

    #[tokio::test]
    async fn panicking_cycle_aborts_the_run() {
        let server = Arc::new(FractalServer::new(HeartbeatConfig::default()));
        let client = Arc::new(LocalClient::new(Arc::clone(&server)));
        let manager =
            QueueManager::new(client, Box::new(BrokenAdapter::default()), ManagerConfig::default())
                .unwrap();
        let name = manager.name().to_string();
        server.submit_tasks(vec![TaskSpec::new("echo", json!({}))]);

        let result = ManagerRunner::run(manager, Duration::from_millis(10), Arc::new(Notify::new())).await;

        assert!(matches!(result, Err(FractalError::Adapter(ref msg)) if msg.contains("aborted")));
        // Never deactivated: the task stays claimed until a sweep reclaims it.
        assert_eq!(server.list_managers(Some(&name))[0].status, ManagerStatus::Active);
        assert_eq!(server.task_counts().running, 1);
    }
}
