//! Task Groups
//!
//! Group records and the graph walks over them. Groups link to their
//! children and parent by id only, so every traversal is a series of
//! registry lookups and the ownership graph stays a forest.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

use super::types::{GroupId, GroupInfo, StatusCounts, TaskId, TaskStatus};

/// Named, nestable collection of tasks and subgroups
#[derive(Debug, Clone)]
pub struct TaskGroup {
    pub id: GroupId,
    pub name: String,
    pub parent_group_id: Option<GroupId>,
    /// Direct child tasks, in attach order
    pub task_ids: Vec<TaskId>,
    /// Direct child groups, in attach order
    pub group_ids: Vec<GroupId>,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl TaskGroup {
    pub fn new(id: GroupId, name: impl Into<String>, parent_group_id: Option<GroupId>, seq: u64) -> Self {
        let name = name.into();
        let name = if name.is_empty() {
            format!("Group-{}", id.short())
        } else {
            name
        };

        Self {
            id,
            name,
            parent_group_id,
            task_ids: Vec::new(),
            group_ids: Vec::new(),
            seq,
            created_at: Utc::now(),
            submitted_at: None,
            cancelled_at: None,
        }
    }

    pub fn add_task(&mut self, task_id: TaskId) {
        if !self.task_ids.contains(&task_id) {
            self.task_ids.push(task_id);
        }
    }

    pub fn remove_task(&mut self, task_id: &TaskId) -> bool {
        let before = self.task_ids.len();
        self.task_ids.retain(|id| id != task_id);
        self.task_ids.len() != before
    }

    pub fn add_sub_group(&mut self, group_id: GroupId) {
        if !self.group_ids.contains(&group_id) {
            self.group_ids.push(group_id);
        }
    }

    pub fn remove_sub_group(&mut self, group_id: &GroupId) -> bool {
        let before = self.group_ids.len();
        self.group_ids.retain(|id| id != group_id);
        self.group_ids.len() != before
    }
}

/// Every group and task under a root, root included
#[derive(Debug, Clone, Default)]
pub struct Subtree {
    /// Pre-order: a group always precedes its descendants
    pub group_ids: Vec<GroupId>,
    pub task_ids: Vec<TaskId>,
}

/// Collect the subtree rooted at `root`. Returns `None` if `root` is unknown.
pub fn subtree(groups: &HashMap<GroupId, TaskGroup>, root: GroupId) -> Option<Subtree> {
    groups.get(&root)?;

    let mut out = Subtree::default();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(group) = groups.get(&id) else {
            continue;
        };
        out.group_ids.push(id);
        out.task_ids.extend(group.task_ids.iter().copied());
        // Reverse keeps siblings in attach order
        stack.extend(group.group_ids.iter().rev().copied());
    }
    Some(out)
}

/// Groups under `root` in post-order (children before their parent),
/// each paired with its direct tasks.
pub fn post_order(groups: &HashMap<GroupId, TaskGroup>, root: GroupId) -> Vec<(GroupId, Vec<TaskId>)> {
    // Reversed pre-order that visits siblings last-first
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
        let Some(group) = groups.get(&id) else {
            continue;
        };
        out.push((id, group.task_ids.clone()));
        stack.extend(group.group_ids.iter().copied());
    }
    out.reverse();
    out
}

/// Whether `candidate` is `ancestor` itself or lies beneath it
pub fn is_within(groups: &HashMap<GroupId, TaskGroup>, ancestor: GroupId, candidate: GroupId) -> bool {
    let mut current = Some(candidate);
    while let Some(id) = current {
        if id == ancestor {
            return true;
        }
        current = groups.get(&id).and_then(|g| g.parent_group_id);
    }
    false
}

/// Snapshot a group, deriving its status from the statuses of every
/// descendant task.
pub fn group_info(group: &TaskGroup, descendant_statuses: impl IntoIterator<Item = TaskStatus>) -> GroupInfo {
    let descendant_counts = StatusCounts::from_statuses(descendant_statuses);

    GroupInfo {
        id: group.id,
        name: group.name.clone(),
        parent_group_id: group.parent_group_id,
        status: descendant_counts.derived_status(),
        task_ids: group.task_ids.clone(),
        group_ids: group.group_ids.clone(),
        descendant_counts,
        created_at: group.created_at,
        submitted_at: group.submitted_at,
        cancelled_at: group.cancelled_at,
    }
}
