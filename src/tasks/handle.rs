//! Task Handles
//!
//! Awaitables returned by submission. Any number of handles may watch the
//! same task; each resolves once the task reaches a terminal state.

use futures::future::{self, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::IntoFuture;
use tokio::sync::watch;

use super::types::{GroupId, GroupOutcome, TaskId, TaskOutcome};

/// Handle on a single task's terminal outcome
#[derive(Debug, Clone)]
pub struct TaskHandle {
    task_id: TaskId,
    outcome_rx: watch::Receiver<Option<TaskOutcome>>,
}

impl TaskHandle {
    pub(crate) fn new(task_id: TaskId, outcome_rx: watch::Receiver<Option<TaskOutcome>>) -> Self {
        Self {
            task_id,
            outcome_rx,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn is_finished(&self) -> bool {
        self.outcome_rx.borrow().is_some()
    }

    /// Outcome if the task is already terminal
    pub fn try_outcome(&self) -> Option<TaskOutcome> {
        self.outcome_rx.borrow().clone()
    }

    /// Wait for the terminal outcome
    pub async fn outcome(mut self) -> TaskOutcome {
        let outcome = match self.outcome_rx.wait_for(Option::is_some).await {
            Ok(outcome) => Option::clone(&outcome),
            Err(_) => None,
        };
        // No outcome means the record is gone along with its manager
        outcome.unwrap_or(TaskOutcome::Cancelled)
    }
}

impl IntoFuture for TaskHandle {
    type Output = TaskOutcome;
    type IntoFuture = BoxFuture<'static, TaskOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome().boxed()
    }
}

/// Handle on every descendant task of a submitted group
#[derive(Debug)]
pub struct GroupHandle {
    group_id: GroupId,
    handles: Vec<TaskHandle>,
}

impl GroupHandle {
    pub(crate) fn new(group_id: GroupId, handles: Vec<TaskHandle>) -> Self {
        Self { group_id, handles }
    }

    pub fn group_id(&self) -> GroupId {
        self.group_id
    }

    /// Ids of the tasks this handle collects
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.handles.iter().map(TaskHandle::task_id).collect()
    }

    /// Wait for every descendant; one failure never short-circuits the rest
    pub async fn outcome(self) -> GroupOutcome {
        let ids = self.task_ids();
        let outcomes = future::join_all(self.handles.into_iter().map(TaskHandle::outcome)).await;
        GroupOutcome::new(
            self.group_id,
            ids.into_iter().zip(outcomes).collect::<HashMap<_, _>>(),
        )
    }
}

impl IntoFuture for GroupHandle {
    type Output = GroupOutcome;
    type IntoFuture = BoxFuture<'static, GroupOutcome>;

    fn into_future(self) -> Self::IntoFuture {
        self.outcome().boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::types::{OperationFailure, TaskStatus};

    #[tokio::test]
    async fn test_task_handle_resolves_on_send() {
        let (tx, rx) = watch::channel(None);
        let handle = TaskHandle::new(TaskId::new(), rx);

        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            tx.send_replace(Some(TaskOutcome::Completed(serde_json::json!(42))));
            // Keep the sender alive until the value is observed
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        });

        assert_eq!(handle.await, TaskOutcome::Completed(serde_json::json!(42)));
    }

    #[tokio::test]
    async fn test_task_handle_dropped_sender() {
        let (tx, rx) = watch::channel(None);
        drop(tx);
        let handle = TaskHandle::new(TaskId::new(), rx);
        assert_eq!(handle.await, TaskOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_group_handle_collects_all() {
        let ok = TaskId::new();
        let bad = TaskId::new();
        let (_ok_tx, ok_rx) =
            watch::channel(Some(TaskOutcome::Completed(serde_json::json!(1))));
        let (_bad_tx, bad_rx) =
            watch::channel(Some(TaskOutcome::Failed(OperationFailure::error("boom"))));

        let group = GroupHandle::new(
            GroupId::new(),
            vec![TaskHandle::new(ok, ok_rx), TaskHandle::new(bad, bad_rx)],
        );
        let outcome = group.await;
        assert_eq!(outcome.outcomes.len(), 2);
        assert_eq!(outcome.status, TaskStatus::Failed);
        assert_eq!(outcome.get(&ok).map(|o| o.status()), Some(TaskStatus::Completed));
    }

    #[tokio::test]
    async fn test_empty_group_handle_completes() {
        let outcome = GroupHandle::new(GroupId::new(), vec![]).await;
        assert!(outcome.outcomes.is_empty());
        assert_eq!(outcome.status, TaskStatus::Completed);
    }
}
