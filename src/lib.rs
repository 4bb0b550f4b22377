//! Task Scheduler
//!
//! Runs named async operations as tracked tasks, organizes them into
//! nestable groups, and aggregates their outcomes.

pub mod tasks;

pub use tasks::{
    GroupHandle, GroupId, GroupOutcome, SchedulerResult, TaskError, TaskHandle, TaskId,
    TaskManager, TaskManagerConfig, TaskOutcome, TaskStatus,
};
