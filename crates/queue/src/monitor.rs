//! Periodic heartbeat sweep, independent of any manager.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::server::FractalServer;

pub struct HeartbeatMonitor {
    server: Arc<FractalServer>,
    sweep_interval: Duration,
}

impl HeartbeatMonitor {
    /// Monitor sweeping at the server's configured interval.
    pub fn new(server: Arc<FractalServer>) -> Self {
        let sweep_interval = server.heartbeat_config().sweep_interval();
        Self {
            server,
            sweep_interval,
        }
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Sweep until `shutdown` is notified. Returns the number of sweeps run.
    pub async fn run(self, shutdown: Arc<Notify>) -> u64 {
        info!(
            interval = ?self.sweep_interval,
            timeout = ?self.server.heartbeat_config().timeout(),
            "heartbeat monitor started"
        );

        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick; nobody can have timed out yet.
        ticker.tick().await;

        let stop = shutdown.notified();
        tokio::pin!(stop);

        let mut sweeps = 0u64;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.server.check_manager_heartbeats();
                    sweeps += 1;
                    debug!(
                        sweep = sweeps,
                        deactivated = report.deactivated.len(),
                        "heartbeat sweep"
                    );
                }
                _ = &mut stop => {
                    break;
                }
            }
        }

        info!(sweeps, "heartbeat monitor stopped");
        sweeps
    }

    /// Run on the current tokio runtime.
    pub fn spawn(self, shutdown: Arc<Notify>) -> JoinHandle<u64> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use fractal_core::{HeartbeatConfig, ManagerRegistration, ManagerStatus, TaskSpec, TaskStatus};
    use serde_json::json;

    use super::*;

    fn fast_server() -> Arc<FractalServer> {
        Arc::new(FractalServer::new(HeartbeatConfig {
            heartbeat_frequency_ms: 20,
            max_missed_heartbeats: 5,
            sweep_interval_ms: Some(10),
        }))
    }

    #[tokio::test]
    async fn silent_manager_goes_inactive_and_tasks_return() {
        let server = fast_server();
        let ids = server.submit_tasks(vec![TaskSpec::new("echo", json!({}))]);
        let mut reg = ManagerRegistration::new("test", "localhost");
        reg.programs.insert("echo".into());
        let name = server.register_manager(&reg);
        server.claim_tasks(&name, None, &reg.programs, 1).unwrap();

        let shutdown = Arc::new(Notify::new());
        let handle = HeartbeatMonitor::new(Arc::clone(&server)).spawn(Arc::clone(&shutdown));

        // timeout (100ms) + sweep interval (10ms), with slack for scheduling.
        tokio::time::sleep(Duration::from_millis(400)).await;
        shutdown.notify_one();
        let sweeps = handle.await.unwrap();
        assert!(sweeps > 0);

        let record = &server.list_managers(Some(&name))[0];
        assert_eq!(record.status, ManagerStatus::Inactive);
        assert_eq!(server.store().get(&ids[0]).unwrap().status, TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn heartbeating_manager_stays_active() {
        let server = fast_server();
        let name = server.register_manager(&ManagerRegistration::new("test", "localhost"));

        let shutdown = Arc::new(Notify::new());
        let handle = HeartbeatMonitor::new(Arc::clone(&server)).spawn(Arc::clone(&shutdown));

        for _ in 0..20 {
            server.manager_heartbeat(&name).unwrap();
            tokio::time::sleep(Duration::from_millis(15)).await;
        }
        shutdown.notify_one();
        handle.await.unwrap();

        assert_eq!(server.list_managers(Some(&name))[0].status, ManagerStatus::Active);
    }

    #[test]
    fn interval_defaults_to_server_config() {
        let server = fast_server();
        let monitor = HeartbeatMonitor::new(server);
        assert_eq!(monitor.sweep_interval(), Duration::from_millis(10));
        let monitor = monitor.with_sweep_interval(Duration::from_secs(1));
        assert_eq!(monitor.sweep_interval(), Duration::from_secs(1));
    }
}
