//! Task Events
//!
//! Lifecycle notifications broadcast by the task manager.

use serde::Serialize;

use super::types::{GroupId, OperationFailure, TaskId, TaskInfo};

/// Task event for broadcasts
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum TaskEvent {
    /// Task created
    TaskCreated(TaskInfo),
    /// Task started running
    TaskStarted(TaskId),
    /// Task completed
    TaskCompleted(TaskId),
    /// Task failed
    TaskFailed(TaskId, OperationFailure),
    /// Task cancelled
    TaskCancelled(TaskId),
    /// Group created
    GroupCreated(GroupId),
    /// Group submitted
    GroupSubmitted(GroupId),
    /// Group cancelled
    GroupCancelled(GroupId),
}

impl TaskEvent {
    /// Event name, e.g. `task:started`
    pub fn name(&self) -> &'static str {
        match self {
            Self::TaskCreated(_) => "task:created",
            Self::TaskStarted(_) => "task:started",
            Self::TaskCompleted(_) => "task:completed",
            Self::TaskFailed(_, _) => "task:failed",
            Self::TaskCancelled(_) => "task:cancelled",
            Self::GroupCreated(_) => "group:created",
            Self::GroupSubmitted(_) => "group:submitted",
            Self::GroupCancelled(_) => "group:cancelled",
        }
    }

    /// Task this event refers to, if any
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            Self::TaskCreated(info) => Some(info.id),
            Self::TaskStarted(id)
            | Self::TaskCompleted(id)
            | Self::TaskFailed(id, _)
            | Self::TaskCancelled(id) => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let id = TaskId::new();
        assert_eq!(TaskEvent::TaskStarted(id).name(), "task:started");
        assert_eq!(TaskEvent::GroupCancelled(GroupId::new()).name(), "group:cancelled");
        assert_eq!(TaskEvent::TaskCancelled(id).task_id(), Some(id));
        assert_eq!(TaskEvent::GroupSubmitted(GroupId::new()).task_id(), None);
    }
}
