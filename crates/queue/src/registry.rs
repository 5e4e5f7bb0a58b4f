//! Server-side table of known queue managers.
//!
//! Heartbeats, sweeps and deactivation all go through the same lock, and the
//! sweep re-checks each timestamp inside it, so a heartbeat that lands while a
//! sweep is running is never lost.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use fractal_core::{FractalError, ManagerRecord, ManagerRegistration, ManagerStatus};

/// Filter for [`ManagerRegistry::list`].
#[derive(Debug, Clone, Default)]
pub struct ManagerFilter<'a> {
    pub name: Option<&'a str>,
    pub status: Option<ManagerStatus>,
}

#[derive(Debug, Default)]
pub struct ManagerRegistry {
    managers: Mutex<HashMap<String, ManagerRecord>>,
}

impl ManagerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ManagerRecord>> {
        self.managers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a manager, or re-activate an existing one with fresh capabilities.
    pub fn register(&self, registration: &ManagerRegistration, now: DateTime<Utc>) -> String {
        let name = registration.name();
        let mut managers = self.lock();
        match managers.get_mut(&name) {
            Some(existing) => {
                existing.tags = registration.tags.clone();
                existing.programs = registration.programs.clone();
                existing.username = registration.username.clone();
                existing.status = ManagerStatus::Active;
                existing.last_heartbeat = now;
                info!(manager = %name, "manager re-registered");
            }
            None => {
                managers.insert(name.clone(), ManagerRecord::from_registration(registration, now));
                info!(
                    manager = %name,
                    tags = ?registration.tags,
                    programs = registration.programs.len(),
                    "manager registered"
                );
            }
        }
        name
    }

    /// Refresh `last_heartbeat`. Timestamps only move forward.
    pub fn heartbeat(&self, name: &str, now: DateTime<Utc>) -> Result<(), FractalError> {
        let mut managers = self.lock();
        match managers.get_mut(name) {
            Some(record) if record.is_active() => {
                if now > record.last_heartbeat {
                    record.last_heartbeat = now;
                }
                Ok(())
            }
            _ => Err(FractalError::UnknownManager(name.to_string())),
        }
    }

    /// ACTIVE → INACTIVE. Fails with `UnknownManager` when the manager is
    /// unknown or already inactive, so only one caller ever wins.
    pub fn deactivate(&self, name: &str) -> Result<(), FractalError> {
        let mut managers = self.lock();
        match managers.get_mut(name) {
            Some(record) if record.is_active() => {
                record.status = ManagerStatus::Inactive;
                info!(manager = %name, "manager deactivated");
                Ok(())
            }
            _ => Err(FractalError::UnknownManager(name.to_string())),
        }
    }

    /// Deactivate every ACTIVE manager silent for longer than `timeout`.
    /// Returns the names this call deactivated.
    pub fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        let mut managers = self.lock();
        let mut expired = Vec::new();

        for record in managers.values_mut() {
            if !record.is_active() {
                continue;
            }
            let silent = now
                .signed_duration_since(record.last_heartbeat)
                .to_std()
                .unwrap_or_default();
            if silent > timeout {
                record.status = ManagerStatus::Inactive;
                warn!(
                    manager = %record.name,
                    silent_secs = silent.as_secs_f64(),
                    "manager missed heartbeats, marking inactive"
                );
                expired.push(record.name.clone());
            }
        }

        expired.sort();
        expired
    }

    /// Run `f` against an ACTIVE manager's record while holding the registry lock.
    pub fn with_active<R>(
        &self,
        name: &str,
        f: impl FnOnce(&mut ManagerRecord) -> R,
    ) -> Result<R, FractalError> {
        let mut managers = self.lock();
        match managers.get_mut(name) {
            Some(record) if record.is_active() => Ok(f(record)),
            _ => Err(FractalError::UnknownManager(name.to_string())),
        }
    }

    pub fn record_completed(&self, name: &str, completed: u64, failed: u64) {
        if completed == 0 && failed == 0 {
            return;
        }
        match self.lock().get_mut(name) {
            Some(record) => {
                record.completed += completed;
                record.failed += failed;
            }
            None => warn!(manager = %name, "results recorded for unknown manager"),
        }
    }

    pub fn record_returned(&self, name: &str, returned: u64) {
        if let Some(record) = self.lock().get_mut(name) {
            record.returned += returned;
        }
    }

    pub fn get(&self, name: &str) -> Option<ManagerRecord> {
        self.lock().get(name).cloned()
    }

    /// Matching managers, oldest registration first.
    pub fn list(&self, filter: &ManagerFilter<'_>) -> Vec<ManagerRecord> {
        let mut records: Vec<ManagerRecord> = self
            .lock()
            .values()
            .filter(|r| filter.name.map_or(true, |n| r.name == n))
            .filter(|r| filter.status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        records
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|r| r.is_active()).count()
    }
}
