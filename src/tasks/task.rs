//! Task Record
//!
//! A single task's lifecycle state. Every transition happens under the
//! task's own lock, which is what makes completion and cancellation race
//! deterministically: whichever commits first under the lock wins, and a
//! cancellation request recorded before the runner commits always wins.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::error::{SchedulerResult, TaskError};
use super::handle::TaskHandle;
use super::types::{GroupId, OperationFailure, TaskId, TaskInfo, TaskOutcome, TaskStatus};

/// Type-erased unit of work. Receives the task's cancellation token.
pub(crate) type Operation =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, anyhow::Result<serde_json::Value>> + Send>;

/// Task record shared between the registry and its runner
pub(crate) type SharedTask = Arc<Mutex<Task>>;

/// What a cancel request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelAction {
    /// Pending task moved straight to CANCELLED
    Cancelled,
    /// Running task was signalled; the runner commits CANCELLED
    Requested,
    /// Task had already finished
    AlreadyTerminal,
}

pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub group_id: Option<GroupId>,
    /// Creation order across the whole manager
    pub seq: u64,
    pub status: TaskStatus,
    pub result: Option<serde_json::Value>,
    pub error: Option<OperationFailure>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    operation: Option<Operation>,
    cancel_token: CancellationToken,
    cancel_requested: bool,
    outcome_tx: watch::Sender<Option<TaskOutcome>>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        name: impl Into<String>,
        group_id: Option<GroupId>,
        seq: u64,
        operation: Operation,
    ) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            format!("Task-{}", id.short())
        } else {
            name
        };
        let (outcome_tx, _) = watch::channel(None);

        Self {
            id,
            name,
            group_id,
            seq,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            operation: Some(operation),
            cancel_token: CancellationToken::new(),
            cancel_requested: false,
            outcome_tx,
        }
    }

    /// PENDING -> RUNNING. Hands out the operation exactly once.
    pub(crate) fn start(&mut self) -> SchedulerResult<(Operation, CancellationToken)> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::InvalidState(format!(
                "Task {} is {}, only pending tasks can be submitted",
                self.id, self.status
            )));
        }
        let operation = self.operation.take().ok_or_else(|| {
            TaskError::InvalidState(format!("Task {} has already been started", self.id))
        })?;

        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
        Ok((operation, self.cancel_token.clone()))
    }

    /// Commit the runner's result. `None` means the operation was dropped
    /// after observing cancellation.
    pub(crate) fn finish(
        &mut self,
        result: Option<Result<serde_json::Value, OperationFailure>>,
    ) -> TaskOutcome {
        if let Some(outcome) = self.outcome() {
            return outcome;
        }

        match result {
            _ if self.cancel_requested => self.commit_cancelled(),
            None => self.commit_cancelled(),
            Some(Ok(value)) => {
                self.status = TaskStatus::Completed;
                self.result = Some(value);
                self.commit_finished();
            }
            Some(Err(failure)) => {
                self.status = TaskStatus::Failed;
                self.error = Some(failure);
                self.commit_finished();
            }
        }

        self.outcome().unwrap_or(TaskOutcome::Cancelled)
    }

    pub(crate) fn cancel(&mut self) -> CancelAction {
        match self.status {
            TaskStatus::Pending => {
                // Dropping the operation guarantees it can never start
                self.operation = None;
                self.commit_cancelled();
                CancelAction::Cancelled
            }
            TaskStatus::Running => {
                self.cancel_requested = true;
                self.cancel_token.cancel();
                CancelAction::Requested
            }
            _ => CancelAction::AlreadyTerminal,
        }
    }

    fn commit_cancelled(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.result = None;
        self.error = Some(OperationFailure::cancelled());
        self.commit_finished();
    }

    fn commit_finished(&mut self) {
        self.finished_at = Some(Utc::now());
        self.outcome_tx.send_replace(self.outcome());
    }

    /// Terminal outcome, `None` while pending or running
    pub fn outcome(&self) -> Option<TaskOutcome> {
        match self.status {
            TaskStatus::Completed => Some(TaskOutcome::Completed(
                self.result.clone().unwrap_or(serde_json::Value::Null),
            )),
            TaskStatus::Failed => Some(TaskOutcome::Failed(
                self.error
                    .clone()
                    .unwrap_or_else(|| OperationFailure::error("unknown failure")),
            )),
            TaskStatus::Cancelled => Some(TaskOutcome::Cancelled),
            TaskStatus::Pending | TaskStatus::Running => None,
        }
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested
    }

    pub(crate) fn handle(&self) -> TaskHandle {
        TaskHandle::new(self.id, self.outcome_tx.subscribe())
    }

    /// Get duration in milliseconds
    pub fn duration_ms(&self) -> Option<u64> {
        let start = self.started_at?;
        let end = self.finished_at.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds().max(0) as u64)
    }

    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            id: self.id,
            name: self.name.clone(),
            group_id: self.group_id,
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            duration_ms: self.duration_ms(),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("group_id", &self.group_id)
            .field("status", &self.status)
            .field("result", &self.result)
            .field("error", &self.error)
            .field("cancel_requested", &self.cancel_requested)
            .finish_non_exhaustive()
    }
}
