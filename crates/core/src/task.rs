use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a task in the server's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Running,
    Complete,
    Error,
}

impl TaskStatus {
    /// COMPLETE and ERROR are final; nothing moves a task out of them.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Waiting => write!(f, "WAITING"),
            TaskStatus::Running => write!(f, "RUNNING"),
            TaskStatus::Complete => write!(f, "COMPLETE"),
            TaskStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// What a client submits: the program to run, the queue tag, and an opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub program: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskSpec {
    pub fn new(program: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            program: program.into(),
            tag: None,
            payload,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// The view of a claimed task handed to a manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub program: String,
    pub tag: Option<String>,
    pub payload: serde_json::Value,
}

/// Structured description of a failed computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeFailure {
    /// Short machine-readable category (e.g. `unknown_program`, `panic`).
    pub error_type: String,
    pub message: String,
}

impl ComputeFailure {
    pub fn new(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_type: error_type.into(),
            message: message.into(),
        }
    }
}

/// Result of running one task, as pushed back to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskOutcome {
    Success { return_value: serde_json::Value },
    Failure(ComputeFailure),
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success { .. })
    }

    /// Status the task takes on the server once this outcome is accepted.
    pub fn final_status(&self) -> TaskStatus {
        if self.is_success() {
            TaskStatus::Complete
        } else {
            TaskStatus::Error
        }
    }
}

/// Full server-side record of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub spec: TaskSpec,
    pub status: TaskStatus,
    /// Name of the manager holding the claim. Set iff status is RUNNING.
    pub claimed_by: Option<String>,
    /// Manager that delivered the final result.
    pub completed_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub outcome: Option<TaskOutcome>,
}

impl TaskRecord {
    pub fn new(spec: TaskSpec) -> Self {
        Self {
            id: TaskId::new(),
            spec,
            status: TaskStatus::Waiting,
            claimed_by: None,
            completed_by: None,
            submitted_at: Utc::now(),
            claimed_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    pub fn to_task(&self) -> Task {
        Task {
            id: self.id,
            program: self.spec.program.clone(),
            tag: self.spec.tag.clone(),
            payload: self.spec.payload.clone(),
        }
    }
}

/// Server reply to a batch of pushed results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionAck {
    /// Results that moved a task to COMPLETE or ERROR.
    pub accepted: Vec<TaskId>,
    /// Results for tasks already terminal; no state changed.
    pub duplicates: Vec<TaskId>,
    /// Results for tasks this manager no longer owns (or that do not exist).
    pub rejected: Vec<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_maps_to_final_status() {
        let ok = TaskOutcome::Success {
            return_value: serde_json::json!(1),
        };
        let err = TaskOutcome::Failure(ComputeFailure::new("boom", "exploded"));
        assert_eq!(ok.final_status(), TaskStatus::Complete);
        assert_eq!(err.final_status(), TaskStatus::Error);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Waiting.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Complete.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }

    #[test]
    fn status_serializes_in_upper_case() {
        let json = serde_json::to_string(&TaskStatus::Running).unwrap();
        assert_eq!(json, "\"RUNNING\"");
    }

    #[test]
    fn new_record_is_waiting_and_unclaimed() {
        let record = TaskRecord::new(TaskSpec::new("echo", serde_json::json!({})).with_tag("other"));
        assert_eq!(record.status, TaskStatus::Waiting);
        assert!(record.claimed_by.is_none());
        assert_eq!(record.to_task().tag.as_deref(), Some("other"));
    }
}
