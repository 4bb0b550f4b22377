//! Diagnostic snapshots of the task manager.

use serde::Serialize;
use std::collections::HashMap;

use super::types::{GroupInfo, TaskId, TaskInfo};

/// Whether each registry lock was held by someone else when the snapshot began
#[derive(Debug, Clone, Copy, Serialize)]
pub struct LockStates {
    pub tasks_locked: bool,
    pub groups_locked: bool,
    pub running_locked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugStats {
    pub total_tasks: usize,
    pub running_tasks_count: usize,
    pub total_groups: usize,
    /// Every status is present, zero or not
    pub tasks_by_status: HashMap<String, usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DebugInfo {
    pub locks: LockStates,
    pub stats: DebugStats,
    pub running_tasks: Vec<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<GroupInfo>>,
}

impl DebugInfo {
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
    }
}
