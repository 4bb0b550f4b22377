//! Tasks Module
//!
//! Concurrent task and task-group scheduling.
//! Handles async task execution, group aggregation, and cancellation.

pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod global;
pub mod group;
pub mod handle;
pub mod manager;
pub mod task;
pub mod types;

pub use config::TaskManagerConfig;
pub use debug::{DebugInfo, DebugStats, LockStates};
pub use error::{Entity, SchedulerResult, TaskError};
pub use events::TaskEvent;
pub use handle::{GroupHandle, TaskHandle};
pub use manager::TaskManager;
pub use types::{
    FailureKind, GroupId, GroupInfo, GroupOutcome, OperationFailure, StatusCounts, TaskId,
    TaskInfo, TaskOutcome, TaskStatus,
};
