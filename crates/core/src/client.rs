//! Manager ↔ server contract.
//!
//! A queue manager only ever talks to the server through [`FractalClient`].
//! The transport behind it is an implementation choice; every method may fail
//! with [`FractalError::Network`], which managers treat as transient.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::FractalError;
use crate::manager::ManagerRegistration;
use crate::task::{CompletionAck, Task, TaskId, TaskOutcome};

pub trait FractalClient: Send + Sync {
    /// Register (or re-activate) a manager. Returns the manager name.
    fn register_manager(&self, registration: &ManagerRegistration) -> Result<String, FractalError>;

    /// Refresh the manager's liveness timestamp.
    fn heartbeat(&self, manager: &str) -> Result<(), FractalError>;

    /// Claim up to `limit` waiting tasks. `tag == None` matches any tag.
    fn claim_tasks(
        &self,
        manager: &str,
        tag: Option<&str>,
        programs: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Task>, FractalError>;

    /// Push finished results. Re-pushing an already accepted result is a no-op.
    fn complete_tasks(
        &self,
        manager: &str,
        results: &[(TaskId, TaskOutcome)],
    ) -> Result<CompletionAck, FractalError>;

    /// Mark the manager inactive; returns how many of its tasks went back to the pool.
    fn deactivate_manager(&self, manager: &str) -> Result<usize, FractalError>;

    /// Username the client authenticates as, recorded on the manager.
    fn username(&self) -> Option<String> {
        None
    }
}

impl<T: FractalClient + ?Sized> FractalClient for Arc<T> {
    fn register_manager(&self, registration: &ManagerRegistration) -> Result<String, FractalError> {
        (**self).register_manager(registration)
    }

    fn heartbeat(&self, manager: &str) -> Result<(), FractalError> {
        (**self).heartbeat(manager)
    }

    fn claim_tasks(
        &self,
        manager: &str,
        tag: Option<&str>,
        programs: &BTreeSet<String>,
        limit: usize,
    ) -> Result<Vec<Task>, FractalError> {
        (**self).claim_tasks(manager, tag, programs, limit)
    }

    fn complete_tasks(
        &self,
        manager: &str,
        results: &[(TaskId, TaskOutcome)],
    ) -> Result<CompletionAck, FractalError> {
        (**self).complete_tasks(manager, results)
    }

    fn deactivate_manager(&self, manager: &str) -> Result<usize, FractalError> {
        (**self).deactivate_manager(manager)
    }

    fn username(&self) -> Option<String> {
        (**self).username()
    }
}
