//! In-process [`FractalClient`] backed directly by a [`FractalServer`].

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use fractal_core::{
    CompletionAck, FractalClient, FractalError, ManagerRegistration, Task, TaskId, TaskOutcome,
};

use crate::server::FractalServer;

/// Client that calls the server in the same process.
///
/// The network fault switch makes every call fail with
/// [`FractalError::Network`] until it is cleared, which is how the manager's
/// stale-result path is exercised without a real transport.
#[derive(Debug)]
pub struct LocalClient {
    server: Arc<FractalServer>,
    username: Option<String>,
    network_error: AtomicBool,
}

impl LocalClient {
    pub fn new(server: Arc<FractalServer>) -> Self {
        Self {
            server,
            username: None,
            network_error: AtomicBool::new(false),
        }
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn server(&self) -> &Arc<FractalServer> {
        &self.server
    }

    /// Simulate (or clear) a network outage between manager and server.
    pub fn set_network_error(&self, failing: bool) {
        self.network_error.store(failing, Ordering::SeqCst);
    }

    fn check_network(&self, operation: &str) -> Result<(), FractalError> {
        if self.network_error.load(Ordering::SeqCst) {
            debug!(operation, "simulated network error");
            return Err(FractalError::Network(format!("{operation}: server unreachable")));
        }
        Ok(())
    }
}

impl FractalClient for LocalClient {
    fn register_manager(&self, registration: &ManagerRegistration) -> Result<String, FractalError> {
        self.check_network("register")?;
        let mut registration = registration.clone();
        if registration.username.is_none() {
            registration.username = self.username.clone();
        }
        Ok(self.server.register_manager(&registration))
    }

    fn heartbeat(&self, manager: &str) -> Result<(), FractalError> {
        self.check_network("heartbeat")?;
        self.server.manager_heartbeat(manager)
    }

    fn claim_tasks(
        &self,
        manager: &str,
        tag: Option<&str>,
        programs: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Task>, FractalError> {
        self.check_network("claim")?;
        self.server.claim_tasks(manager, tag, programs, limit)
    }

    fn complete_tasks(
        &self,
        manager: &str,
        results: &[(TaskId, TaskOutcome)],
    ) -> Result<CompletionAck, FractalError> {
        self.check_network("complete")?;
        Ok(self.server.complete_tasks(manager, results))
    }

    fn deactivate_manager(&self, manager: &str) -> Result<usize, FractalError> {
        self.check_network("deactivate")?;
        self.server.deactivate_manager(manager)
    }

    fn username(&self) -> Option<String> {
        self.username.clone()
    }
}
