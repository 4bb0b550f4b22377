//! Scheduler Error Types

use std::fmt;
use thiserror::Error;

use super::types::{GroupId, OperationFailure, TaskId};

/// A registry entry referenced by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Task(TaskId),
    Group(GroupId),
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(id) => write!(f, "Task {}", id),
            Self::Group(id) => write!(f, "Group {}", id),
        }
    }
}

/// Scheduler errors
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("{0} not found")]
    NotFound(Entity),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Failure captured from a task's own operation
    #[error("Operation failed: {0}")]
    OperationFailed(OperationFailure),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskError {
    pub fn task_not_found(id: TaskId) -> Self {
        Self::NotFound(Entity::Task(id))
    }

    pub fn group_not_found(id: GroupId) -> Self {
        Self::NotFound(Entity::Group(id))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}

impl From<toml::de::Error> for TaskError {
    fn from(err: toml::de::Error) -> Self {
        TaskError::InvalidConfig(err.to_string())
    }
}

impl From<TaskError> for String {
    fn from(err: TaskError) -> String {
        err.to_string()
    }
}

/// Result type alias for scheduler operations
pub type SchedulerResult<T> = Result<T, TaskError>;
