use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ManagerStatus {
    Active,
    Inactive,
}

impl std::fmt::Display for ManagerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ManagerStatus::Active => write!(f, "ACTIVE"),
            ManagerStatus::Inactive => write!(f, "INACTIVE"),
        }
    }
}

/// Identity and capabilities a queue manager announces when it registers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerRegistration {
    pub cluster: String,
    pub hostname: String,
    pub uuid: Uuid,
    /// Queue tags served. Empty means the manager accepts any tag.
    pub tags: BTreeSet<String>,
    /// Program names the manager can execute.
    pub programs: BTreeSet<String>,
    pub username: Option<String>,
}

impl ManagerRegistration {
    pub fn new(cluster: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            hostname: hostname.into(),
            uuid: Uuid::new_v4(),
            tags: BTreeSet::new(),
            programs: BTreeSet::new(),
            username: None,
        }
    }

    /// Unique manager name: `{cluster}-{hostname}-{uuid}`.
    pub fn name(&self) -> String {
        format!("{}-{}-{}", self.cluster, self.hostname, self.uuid)
    }
}

/// Server-side record of a manager. Never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagerRecord {
    pub name: String,
    pub cluster: String,
    pub hostname: String,
    pub tags: BTreeSet<String>,
    pub programs: BTreeSet<String>,
    pub status: ManagerStatus,
    /// Tasks claimed by this manager.
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks handed back to the pool when the manager went inactive.
    pub returned: u64,
    pub username: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

impl ManagerRecord {
    pub fn from_registration(registration: &ManagerRegistration, now: DateTime<Utc>) -> Self {
        Self {
            name: registration.name(),
            cluster: registration.cluster.clone(),
            hostname: registration.hostname.clone(),
            tags: registration.tags.clone(),
            programs: registration.programs.clone(),
            status: ManagerStatus::Active,
            submitted: 0,
            completed: 0,
            failed: 0,
            returned: 0,
            username: registration.username.clone(),
            created_at: now,
            last_heartbeat: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ManagerStatus::Active
    }

    /// The single queue tag of this manager, if it serves exactly one.
    pub fn tag(&self) -> Option<&str> {
        if self.tags.len() == 1 {
            self.tags.iter().next().map(String::as_str)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_name_is_unique_per_instance() {
        let a = ManagerRegistration::new("cluster", "host");
        let b = ManagerRegistration::new("cluster", "host");
        assert!(a.name().starts_with("cluster-host-"));
        assert_ne!(a.name(), b.name());
    }

    #[test]
    fn record_starts_active_with_zero_counters() {
        let mut reg = ManagerRegistration::new("c", "h");
        reg.tags.insert("other".into());
        let record = ManagerRecord::from_registration(&reg, Utc::now());
        assert!(record.is_active());
        assert_eq!(record.submitted + record.completed + record.failed, 0);
        assert_eq!(record.tag(), Some("other"));
    }
}
