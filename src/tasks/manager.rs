//! Task Manager
//!
//! Coordinates the task, group and running registries: creation,
//! submission, cancellation and status queries.
//!
//! The three registries are guarded by independent locks and every
//! operation holds at most one of them at a time; cross-registry work
//! releases one before taking the next. A task's own lock is a leaf: it may
//! be taken under a registry lock, never the other way round. The only
//! multi-lock holder is `debug_info`, which takes the three read locks in
//! the fixed order tasks, groups, running.

use anyhow::Context;
use chrono::Utc;
use futures::FutureExt;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::config::TaskManagerConfig;
use super::debug::{DebugInfo, DebugStats, LockStates};
use super::error::{SchedulerResult, TaskError};
use super::events::TaskEvent;
use super::group::{self, TaskGroup};
use super::handle::{GroupHandle, TaskHandle};
use super::task::{CancelAction, Operation, SharedTask, Task};
use super::types::{
    GroupId, GroupInfo, OperationFailure, StatusCounts, TaskId, TaskInfo, TaskOutcome, TaskStatus,
};

/// Ids of submitted tasks that have not reached a terminal state
struct RunningSet {
    ids: Mutex<HashSet<TaskId>>,
    /// Mirrors `ids.len()`, updated under the same lock
    count_tx: watch::Sender<usize>,
}

impl RunningSet {
    fn new() -> Self {
        let (count_tx, _) = watch::channel(0);
        Self {
            ids: Mutex::new(HashSet::new()),
            count_tx,
        }
    }

    fn insert(&self, task_id: TaskId) {
        let mut ids = self.ids.lock();
        ids.insert(task_id);
        self.count_tx.send_replace(ids.len());
    }

    fn remove(&self, task_id: &TaskId) -> bool {
        let mut ids = self.ids.lock();
        let removed = ids.remove(task_id);
        self.count_tx.send_replace(ids.len());
        removed
    }

    fn snapshot(&self) -> Vec<TaskId> {
        self.ids.lock().iter().copied().collect()
    }

    fn is_locked(&self) -> bool {
        self.ids.is_locked()
    }

    /// Resolves once the set is empty. Insertions made while waiting keep
    /// it waiting.
    async fn wait_idle(&self) {
        let mut count_rx = self.count_tx.subscribe();
        let _ = count_rx.wait_for(|count| *count == 0).await;
    }
}

/// Task manager for handling concurrent tasks and task groups
pub struct TaskManager {
    /// Every task ever created (task_id -> Task)
    tasks: Arc<RwLock<HashMap<TaskId, SharedTask>>>,
    /// Every group ever created (group_id -> TaskGroup)
    groups: Arc<RwLock<HashMap<GroupId, TaskGroup>>>,
    /// Tasks currently running
    running: Arc<RunningSet>,
    /// Event broadcaster
    event_tx: broadcast::Sender<TaskEvent>,
    /// Creation order for tasks and groups alike
    next_seq: AtomicU64,
    config: TaskManagerConfig,
}

impl TaskManager {
    /// Create a new task manager
    pub fn new() -> Self {
        Self::build(TaskManagerConfig::default())
    }

    /// Create with custom settings
    pub fn with_config(config: TaskManagerConfig) -> SchedulerResult<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: TaskManagerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_capacity);

        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            groups: Arc::new(RwLock::new(HashMap::new())),
            running: Arc::new(RunningSet::new()),
            event_tx,
            next_seq: AtomicU64::new(0),
            config,
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// Subscribe to task events
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: TaskEvent) {
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    fn shared_task(&self, task_id: TaskId) -> SchedulerResult<SharedTask> {
        self.tasks
            .read()
            .get(&task_id)
            .cloned()
            .ok_or_else(|| TaskError::task_not_found(task_id))
    }

    fn ensure_group(&self, group_id: GroupId) -> SchedulerResult<()> {
        if self.groups.read().contains_key(&group_id) {
            Ok(())
        } else {
            Err(TaskError::group_not_found(group_id))
        }
    }

    fn ensure_runtime() -> SchedulerResult<tokio::runtime::Handle> {
        tokio::runtime::Handle::try_current().map_err(|_| {
            TaskError::InvalidState("tasks can only be submitted inside a tokio runtime".to_string())
        })
    }

    fn statuses_of(&self, task_ids: &[TaskId]) -> Vec<TaskStatus> {
        let tasks = self.tasks.read();
        task_ids
            .iter()
            .filter_map(|id| tasks.get(id).map(|t| t.lock().status))
            .collect()
    }

    /// Register a new pending task, optionally inside a group
    pub fn create_task<F, Fut, T>(
        &self,
        name: impl Into<String>,
        group_id: Option<GroupId>,
        operation: F,
    ) -> SchedulerResult<TaskInfo>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        self.create_cancellable_task(name, group_id, move |_token| operation())
    }

    /// Like `create_task`, but the operation receives the task's
    /// cancellation token
    pub fn create_cancellable_task<F, Fut, T>(
        &self,
        name: impl Into<String>,
        group_id: Option<GroupId>,
        operation: F,
    ) -> SchedulerResult<TaskInfo>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        let operation: Operation = Box::new(move |token| {
            async move {
                let value = operation(token).await?;
                let value = serde_json::to_value(value).context("serializing task result")?;
                anyhow::Ok(value)
            }
            .boxed()
        });

        self.register_task(name.into(), group_id, operation)
    }

    fn register_task(
        &self,
        name: String,
        group_id: Option<GroupId>,
        operation: Operation,
    ) -> SchedulerResult<TaskInfo> {
        if let Some(group_id) = group_id {
            self.ensure_group(group_id)?;
        }

        let task_id = TaskId::new();
        let task = Task::new(task_id, name, group_id, self.next_seq(), operation);
        let info = task.info();
        self.tasks.write().insert(task_id, Arc::new(Mutex::new(task)));

        // Groups are never removed, so the check above still holds
        if let Some(group_id) = group_id {
            if let Some(group) = self.groups.write().get_mut(&group_id) {
                group.add_task(task_id);
            }
        }

        debug!("Created task: {} ({})", info.name, info.id);
        self.emit(TaskEvent::TaskCreated(info.clone()));
        Ok(info)
    }

    /// Register a new empty group, optionally nested under a parent
    pub fn create_group(
        &self,
        name: impl Into<String>,
        parent_group_id: Option<GroupId>,
    ) -> SchedulerResult<GroupInfo> {
        let group_id = GroupId::new();
        let group = TaskGroup::new(group_id, name, parent_group_id, self.next_seq());

        {
            let mut groups = self.groups.write();
            if let Some(parent_id) = parent_group_id {
                groups
                    .get_mut(&parent_id)
                    .ok_or_else(|| TaskError::group_not_found(parent_id))?
                    .add_sub_group(group_id);
            }
            groups.insert(group_id, group.clone());
        }

        debug!("Created group: {} ({})", group.name, group_id);
        self.emit(TaskEvent::GroupCreated(group_id));
        Ok(group::group_info(&group, []))
    }

    /// Start a pending task on the runtime
    pub fn submit_task(&self, task_id: TaskId) -> SchedulerResult<TaskHandle> {
        let runtime = Self::ensure_runtime()?;
        let task = self.shared_task(task_id)?;

        let (operation, token, handle, name) = {
            let mut guard = task.lock();
            let (operation, token) = guard.start()?;
            (operation, token, guard.handle(), guard.name.clone())
        };

        self.running.insert(task_id);
        info!("Started task: {} ({})", name, task_id);
        self.emit(TaskEvent::TaskStarted(task_id));

        runtime.spawn(run_supervised(
            task,
            operation,
            token,
            Arc::clone(&self.running),
            self.event_tx.clone(),
        ));

        Ok(handle)
    }

    /// A fresh handle on an existing task, in any state
    pub fn task_handle(&self, task_id: TaskId) -> SchedulerResult<TaskHandle> {
        Ok(self.shared_task(task_id)?.lock().handle())
    }

    /// Submit every pending descendant task of a group.
    ///
    /// Descendants that are already running or finished are not
    /// resubmitted; their outcomes are still collected by the handle.
    pub fn submit_group(&self, group_id: GroupId) -> SchedulerResult<GroupHandle> {
        Self::ensure_runtime()?;

        let tree = {
            let mut groups = self.groups.write();
            let root = groups
                .get(&group_id)
                .ok_or_else(|| TaskError::group_not_found(group_id))?;
            if root.submitted_at.is_some() {
                return Err(TaskError::InvalidState(format!(
                    "Group {} has already been submitted",
                    group_id
                )));
            }

            let tree = group::subtree(&groups, group_id).unwrap_or_default();
            let now = Utc::now();
            for id in &tree.group_ids {
                if let Some(group) = groups.get_mut(id) {
                    group.submitted_at.get_or_insert(now);
                }
            }
            tree
        };

        let mut handles = Vec::with_capacity(tree.task_ids.len());
        for task_id in tree.task_ids {
            let handle = match self.submit_task(task_id) {
                Ok(handle) => handle,
                Err(TaskError::InvalidState(_)) => self.task_handle(task_id)?,
                Err(err) => return Err(err),
            };
            handles.push(handle);
        }

        info!("Submitted group {} with {} tasks", group_id, handles.len());
        for id in tree.group_ids {
            self.emit(TaskEvent::GroupSubmitted(id));
        }

        Ok(GroupHandle::new(group_id, handles))
    }

    /// Cancel a task.
    ///
    /// Pending tasks are cancelled immediately. Running tasks are signalled
    /// and end CANCELLED once their runner observes it. Returns `false` for
    /// tasks that had already finished.
    pub fn cancel_task(&self, task_id: TaskId) -> SchedulerResult<bool> {
        let task = self.shared_task(task_id)?;
        let (action, name) = {
            let mut guard = task.lock();
            (guard.cancel(), guard.name.clone())
        };

        match action {
            CancelAction::Cancelled => {
                info!("Cancelled task: {} ({})", name, task_id);
                self.emit(TaskEvent::TaskCancelled(task_id));
                Ok(true)
            }
            CancelAction::Requested => {
                debug!("Sent cancel signal to task: {} ({})", name, task_id);
                Ok(true)
            }
            CancelAction::AlreadyTerminal => {
                debug!("Task already finished, nothing to cancel: {} ({})", name, task_id);
                Ok(false)
            }
        }
    }

    /// Cancel every descendant of a group, children before parents.
    /// Returns how many tasks were cancelled or signalled.
    ///
    /// Group status stays derived from tasks, so a cancelled group with no
    /// descendant tasks still reports COMPLETED; `cancelled_at` records the
    /// cancellation.
    pub fn cancel_group(&self, group_id: GroupId) -> SchedulerResult<usize> {
        let order = {
            let groups = self.groups.read();
            if !groups.contains_key(&group_id) {
                return Err(TaskError::group_not_found(group_id));
            }
            group::post_order(&groups, group_id)
        };

        let mut cancelled = 0;
        for (id, task_ids) in order {
            for task_id in task_ids {
                match self.cancel_task(task_id) {
                    Ok(true) => cancelled += 1,
                    Ok(false) => {}
                    Err(err) => warn!("Skipping task {} in group {}: {}", task_id, id, err),
                }
            }

            if let Some(group) = self.groups.write().get_mut(&id) {
                group.cancelled_at.get_or_insert_with(Utc::now);
            }
            self.emit(TaskEvent::GroupCancelled(id));
        }

        info!("Cancelled group {} ({} tasks)", group_id, cancelled);
        Ok(cancelled)
    }

    /// Cancel all active tasks
    pub fn cancel_all(&self) -> usize {
        let active: Vec<TaskId> = self
            .tasks
            .read()
            .values()
            .filter_map(|t| {
                let t = t.lock();
                t.status.is_active().then_some(t.id)
            })
            .collect();

        active
            .into_iter()
            .filter(|id| matches!(self.cancel_task(*id), Ok(true)))
            .count()
    }

    /// Attach an ungrouped task to a group
    pub fn add_task_to_group(&self, task_id: TaskId, group_id: GroupId) -> SchedulerResult<()> {
        self.ensure_group(group_id)?;
        let task = self.shared_task(task_id)?;

        {
            let mut guard = task.lock();
            if let Some(current) = guard.group_id {
                return Err(TaskError::InvalidState(format!(
                    "Task {} already belongs to group {}",
                    task_id, current
                )));
            }
            guard.group_id = Some(group_id);
        }

        if let Some(group) = self.groups.write().get_mut(&group_id) {
            group.add_task(task_id);
        }
        debug!("Added task {} to group {}", task_id, group_id);
        Ok(())
    }

    /// Detach a task from its group. Returns whether it had one.
    pub fn remove_task_from_group(&self, task_id: TaskId) -> SchedulerResult<bool> {
        let task = self.shared_task(task_id)?;
        let previous = task.lock().group_id.take();
        let Some(group_id) = previous else {
            return Ok(false);
        };

        if let Some(group) = self.groups.write().get_mut(&group_id) {
            group.remove_task(&task_id);
        }
        debug!("Removed task {} from group {}", task_id, group_id);
        Ok(true)
    }

    /// Nest a root group under another group
    pub fn add_subgroup(&self, child_id: GroupId, parent_id: GroupId) -> SchedulerResult<()> {
        let mut groups = self.groups.write();
        if !groups.contains_key(&parent_id) {
            return Err(TaskError::group_not_found(parent_id));
        }
        let child = groups
            .get(&child_id)
            .ok_or_else(|| TaskError::group_not_found(child_id))?;
        if let Some(current) = child.parent_group_id {
            return Err(TaskError::InvalidState(format!(
                "Group {} already belongs to group {}",
                child_id, current
            )));
        }
        if group::is_within(&groups, child_id, parent_id) {
            return Err(TaskError::InvalidState(format!(
                "Nesting group {} under {} would create a cycle",
                child_id, parent_id
            )));
        }

        if let Some(child) = groups.get_mut(&child_id) {
            child.parent_group_id = Some(parent_id);
        }
        if let Some(parent) = groups.get_mut(&parent_id) {
            parent.add_sub_group(child_id);
        }
        debug!("Nested group {} under {}", child_id, parent_id);
        Ok(())
    }

    /// Detach a group from its parent, making it a root. Returns whether it
    /// had a parent.
    pub fn remove_subgroup(&self, child_id: GroupId) -> SchedulerResult<bool> {
        let mut groups = self.groups.write();
        let previous = groups
            .get_mut(&child_id)
            .ok_or_else(|| TaskError::group_not_found(child_id))?
            .parent_group_id
            .take();
        let Some(parent_id) = previous else {
            return Ok(false);
        };

        if let Some(parent) = groups.get_mut(&parent_id) {
            parent.remove_sub_group(&child_id);
        }
        debug!("Detached group {} from {}", child_id, parent_id);
        Ok(true)
    }

    pub fn get_task_status(&self, task_id: TaskId) -> SchedulerResult<TaskStatus> {
        Ok(self.shared_task(task_id)?.lock().status)
    }

    /// Result of a completed task. Failed and cancelled tasks yield their
    /// captured failure; unfinished tasks are an invalid state.
    pub fn get_task_result(&self, task_id: TaskId) -> SchedulerResult<serde_json::Value> {
        let task = self.shared_task(task_id)?;
        let guard = task.lock();

        match guard.outcome() {
            Some(TaskOutcome::Completed(value)) => Ok(value),
            Some(TaskOutcome::Failed(failure)) => Err(TaskError::OperationFailed(failure)),
            Some(TaskOutcome::Cancelled) => Err(TaskError::OperationFailed(
                guard.error.clone().unwrap_or_else(OperationFailure::cancelled),
            )),
            None => Err(TaskError::InvalidState(format!(
                "Task {} is {}, its result is not available yet",
                task_id, guard.status
            ))),
        }
    }

    pub fn get_task_info(&self, task_id: TaskId) -> SchedulerResult<TaskInfo> {
        Ok(self.shared_task(task_id)?.lock().info())
    }

    /// Group record with derived status and recursive descendant counts
    pub fn get_group_info(&self, group_id: GroupId) -> SchedulerResult<GroupInfo> {
        let (record, tree) = {
            let groups = self.groups.read();
            let record = groups
                .get(&group_id)
                .cloned()
                .ok_or_else(|| TaskError::group_not_found(group_id))?;
            let tree = group::subtree(&groups, group_id).unwrap_or_default();
            (record, tree)
        };

        let statuses = self.statuses_of(&tree.task_ids);
        Ok(group::group_info(&record, statuses))
    }

    /// List all tasks in creation order
    pub fn list_tasks(&self) -> Vec<TaskInfo> {
        let mut infos: Vec<(u64, TaskInfo)> = self
            .tasks
            .read()
            .values()
            .map(|t| {
                let t = t.lock();
                (t.seq, t.info())
            })
            .collect();
        infos.sort_by_key(|(seq, _)| *seq);
        infos.into_iter().map(|(_, info)| info).collect()
    }

    /// List all groups in creation order
    pub fn list_groups(&self) -> Vec<GroupInfo> {
        let mut records: Vec<(TaskGroup, Vec<TaskId>)> = {
            let groups = self.groups.read();
            groups
                .values()
                .map(|g| {
                    let tree = group::subtree(&groups, g.id).unwrap_or_default();
                    (g.clone(), tree.task_ids)
                })
                .collect()
        };
        records.sort_by_key(|(g, _)| g.seq);

        records
            .into_iter()
            .map(|(record, task_ids)| group::group_info(&record, self.statuses_of(&task_ids)))
            .collect()
    }

    /// Ids of running tasks in creation order
    pub fn running_tasks(&self) -> Vec<TaskId> {
        let ids = self.running.snapshot();
        let tasks = self.tasks.read();
        let mut ordered: Vec<(u64, TaskId)> = ids
            .into_iter()
            .map(|id| (tasks.get(&id).map(|t| t.lock().seq).unwrap_or(u64::MAX), id))
            .collect();
        ordered.sort();
        ordered.into_iter().map(|(_, id)| id).collect()
    }

    /// Count pending and running tasks
    pub fn active_count(&self) -> usize {
        self.tasks
            .read()
            .values()
            .filter(|t| t.lock().status.is_active())
            .count()
    }

    /// Wait until no task is running, including tasks submitted while
    /// waiting
    pub async fn wait_all(&self) {
        self.running.wait_idle().await;
    }

    /// Best-effort cleanup: cancel outstanding work and wait for it to
    /// drain, bounded by the configured grace period
    pub async fn shutdown(&self) {
        info!("Shutting down task manager...");
        let cancelled = self.cancel_all();

        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, self.wait_all()).await.is_err() {
            warn!(
                "{} tasks still running after {}ms shutdown grace",
                self.running.snapshot().len(),
                grace.as_millis()
            );
        } else {
            info!("Task manager shut down ({} tasks cancelled)", cancelled);
        }
    }

    /// Consistent snapshot of every registry for diagnostics
    pub fn debug_info(&self, include_tasks: bool, include_groups: bool) -> DebugInfo {
        let locks = LockStates {
            tasks_locked: self.tasks.is_locked(),
            groups_locked: self.groups.is_locked(),
            running_locked: self.running.is_locked(),
        };

        // Fixed order tasks, groups, running; see the module docs
        let tasks = self.tasks.read();
        let groups = self.groups.read();
        let running = self.running.ids.lock();

        let status_of = |id: &TaskId| tasks.get(id).map(|t| t.lock().status);
        let seq_of = |id: &TaskId| tasks.get(id).map(|t| t.lock().seq).unwrap_or(u64::MAX);

        let counts = StatusCounts::from_statuses(tasks.values().map(|t| t.lock().status));

        let mut running_tasks: Vec<TaskId> = running.iter().copied().collect();
        running_tasks.sort_by_key(|id| seq_of(id));

        let task_details = include_tasks.then(|| {
            let mut infos: Vec<(u64, TaskInfo)> = tasks
                .values()
                .map(|t| {
                    let t = t.lock();
                    (t.seq, t.info())
                })
                .collect();
            infos.sort_by_key(|(seq, _)| *seq);
            infos.into_iter().map(|(_, info)| info).collect()
        });

        let group_details = include_groups.then(|| {
            let mut records: Vec<&TaskGroup> = groups.values().collect();
            records.sort_by_key(|g| g.seq);
            records
                .into_iter()
                .map(|g| {
                    let tree = group::subtree(&groups, g.id).unwrap_or_default();
                    group::group_info(g, tree.task_ids.iter().filter_map(status_of))
                })
                .collect()
        });

        DebugInfo {
            locks,
            stats: DebugStats {
                total_tasks: tasks.len(),
                running_tasks_count: running.len(),
                total_groups: groups.len(),
                tasks_by_status: counts.by_name(),
            },
            running_tasks,
            tasks: task_details,
            groups: group_details,
        }
    }

    /// Print `debug_info` as pretty JSON
    pub fn print_debug_info(&self, include_tasks: bool, include_groups: bool) {
        println!("{}", self.debug_info(include_tasks, include_groups).to_pretty_json());
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.tasks.read().len())
            .field("groups", &self.groups.read().len())
            .field("running", &self.running.snapshot().len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one task's operation and commit its terminal state. Errors and
/// panics inside the operation become FAILED; they never escape.
async fn run_supervised(
    task: SharedTask,
    operation: Operation,
    token: CancellationToken,
    running: Arc<RunningSet>,
    event_tx: broadcast::Sender<TaskEvent>,
) {
    let op_token = token.clone();
    let work = AssertUnwindSafe(async move { operation(op_token).await }).catch_unwind();

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        res = work => Some(match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(OperationFailure::from(err)),
            Err(panic) => Err(OperationFailure::from_panic(panic)),
        }),
    };

    let (task_id, name, outcome) = {
        let mut guard = task.lock();
        let outcome = guard.finish(result);
        (guard.id, guard.name.clone(), outcome)
    };
    running.remove(&task_id);

    let event = match outcome {
        TaskOutcome::Completed(_) => {
            info!("Completed task: {} ({})", name, task_id);
            TaskEvent::TaskCompleted(task_id)
        }
        TaskOutcome::Failed(failure) => {
            warn!("Task failed: {} ({}): {}", name, task_id, failure);
            TaskEvent::TaskFailed(task_id, failure)
        }
        TaskOutcome::Cancelled => {
            info!("Cancelled task: {} ({})", name, task_id);
            TaskEvent::TaskCancelled(task_id)
        }
    };
    let _ = event_tx.send(event);
}
