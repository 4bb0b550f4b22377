//! Task Types
//!
//! Type definitions shared by the task and group registries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Unique task identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(uuid::Uuid);

/// Unique group identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(uuid::Uuid);

macro_rules! impl_id {
    ($ty:ident) => {
        impl $ty {
            /// Generate a fresh random identifier
            pub fn new() -> Self {
                Self(uuid::Uuid::new_v4())
            }

            /// First eight hex characters, used for default names
            pub fn short(&self) -> String {
                self.0.simple().to_string()[..8].to_string()
            }
        }

        impl Default for $ty {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s).map(Self)
            }
        }
    };
}

impl_id!(TaskId);
impl_id!(GroupId);

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is registered but not submitted
    Pending,
    /// Task is currently running
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed with error
    Failed,
    /// Task was cancelled
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 5] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Check if no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Check if the task still has work ahead of it
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of failure ended a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The operation returned an error
    Error,
    /// The operation panicked
    Panic,
    /// The task was cancelled before producing a value
    Cancelled,
}

/// Captured failure of an operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl OperationFailure {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Error,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            message: "task was cancelled".to_string(),
        }
    }

    /// Build from a panic payload as returned by `catch_unwind`
    pub fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "operation panicked".to_string()
        };

        Self {
            kind: FailureKind::Panic,
            message,
        }
    }
}

impl From<anyhow::Error> for OperationFailure {
    fn from(err: anyhow::Error) -> Self {
        // "{:#}" keeps the whole context chain on one line
        Self::error(format!("{:#}", err))
    }
}

impl fmt::Display for OperationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Error => write!(f, "{}", self.message),
            FailureKind::Panic => write!(f, "panicked: {}", self.message),
            FailureKind::Cancelled => write!(f, "{}", self.message),
        }
    }
}

/// Terminal outcome of a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed(serde_json::Value),
    Failed(OperationFailure),
    Cancelled,
}

impl TaskOutcome {
    pub fn status(&self) -> TaskStatus {
        match self {
            Self::Completed(_) => TaskStatus::Completed,
            Self::Failed(_) => TaskStatus::Failed,
            Self::Cancelled => TaskStatus::Cancelled,
        }
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&OperationFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Per-status task counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl StatusCounts {
    pub fn from_statuses(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.record(status);
        }
        counts
    }

    pub fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::Running => self.running += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }

    pub fn get(&self, status: TaskStatus) -> usize {
        match status {
            TaskStatus::Pending => self.pending,
            TaskStatus::Running => self.running,
            TaskStatus::Completed => self.completed,
            TaskStatus::Failed => self.failed,
            TaskStatus::Cancelled => self.cancelled,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.running + self.completed + self.failed + self.cancelled
    }

    /// Aggregate status of a group with these descendant counts.
    ///
    /// Precedence is RUNNING > FAILED > CANCELLED > COMPLETED, where a
    /// pending descendant counts as running. An empty group is COMPLETED.
    pub fn derived_status(&self) -> TaskStatus {
        if self.pending > 0 || self.running > 0 {
            TaskStatus::Running
        } else if self.failed > 0 {
            TaskStatus::Failed
        } else if self.cancelled > 0 {
            TaskStatus::Cancelled
        } else {
            TaskStatus::Completed
        }
    }

    /// Counts keyed by status name, every status present
    pub fn by_name(&self) -> HashMap<String, usize> {
        TaskStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), self.get(*s)))
            .collect()
    }
}

/// Snapshot of a task record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: TaskId,
    pub name: String,
    pub group_id: Option<GroupId>,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<OperationFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

/// Snapshot of a group record with its derived status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupInfo {
    pub id: GroupId,
    pub name: String,
    pub parent_group_id: Option<GroupId>,
    pub status: TaskStatus,
    pub task_ids: Vec<TaskId>,
    pub group_ids: Vec<GroupId>,
    /// Counts over every descendant task, at any depth
    pub descendant_counts: StatusCounts,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// Aggregate result of a submitted group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupOutcome {
    pub group_id: GroupId,
    pub status: TaskStatus,
    /// Outcome of every descendant task, nested groups flattened
    pub outcomes: HashMap<TaskId, TaskOutcome>,
}

impl GroupOutcome {
    pub fn new(group_id: GroupId, outcomes: HashMap<TaskId, TaskOutcome>) -> Self {
        let status =
            StatusCounts::from_statuses(outcomes.values().map(|o| o.status())).derived_status();
        Self {
            group_id,
            status,
            outcomes,
        }
    }

    pub fn get(&self, task_id: &TaskId) -> Option<&TaskOutcome> {
        self.outcomes.get(task_id)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&TaskId, &OperationFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(id, outcome)| outcome.failure().map(|f| (id, f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_status_precedence() {
        let running = StatusCounts {
            running: 1,
            failed: 2,
            ..Default::default()
        };
        assert_eq!(running.derived_status(), TaskStatus::Running);

        let pending = StatusCounts {
            pending: 1,
            completed: 3,
            ..Default::default()
        };
        assert_eq!(pending.derived_status(), TaskStatus::Running);

        let failed = StatusCounts {
            failed: 1,
            cancelled: 1,
            completed: 5,
            ..Default::default()
        };
        assert_eq!(failed.derived_status(), TaskStatus::Failed);

        let cancelled = StatusCounts {
            cancelled: 1,
            completed: 5,
            ..Default::default()
        };
        assert_eq!(cancelled.derived_status(), TaskStatus::Cancelled);

        assert_eq!(StatusCounts::default().derived_status(), TaskStatus::Completed);
    }

    #[test]
    fn test_status_counts_by_name() {
        let counts = StatusCounts::from_statuses([
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ]);
        let by_name = counts.by_name();
        assert_eq!(by_name.len(), 5);
        assert_eq!(by_name["completed"], 2);
        assert_eq!(by_name["failed"], 1);
        assert_eq!(by_name["pending"], 0);
        assert_eq!(counts.total(), 3);
    }

    #[test]
    fn test_failure_from_anyhow_keeps_context() {
        let err = anyhow::anyhow!("connection reset").context("fetching page");
        let failure = OperationFailure::from(err);
        assert_eq!(failure.kind, FailureKind::Error);
        assert_eq!(failure.message, "fetching page: connection reset");
    }

    #[test]
    fn test_failure_from_panic_payload() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let failure = OperationFailure::from_panic(payload);
        assert_eq!(failure.kind, FailureKind::Panic);
        assert_eq!(failure.message, "boom");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(OperationFailure::from_panic(payload).message, "bang");
    }

    #[test]
    fn test_group_outcome_status() {
        let ok = TaskId::new();
        let bad = TaskId::new();
        let mut outcomes = HashMap::new();
        outcomes.insert(ok, TaskOutcome::Completed(serde_json::json!(1)));
        outcomes.insert(bad, TaskOutcome::Failed(OperationFailure::error("boom")));

        let outcome = GroupOutcome::new(GroupId::new(), outcomes);
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.get(&ok).and_then(|o| o.value()), Some(&serde_json::json!(1)));
        assert_eq!(outcome.failed().count(), 1);
    }

    #[test]
    fn test_id_short_and_parse() {
        let id = TaskId::new();
        assert_eq!(id.short().len(), 8);
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_outcome_serialization() {
        let outcome = TaskOutcome::Failed(OperationFailure::error("boom"));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["value"]["message"], "boom");
    }
}
