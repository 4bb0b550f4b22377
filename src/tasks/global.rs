//! Process-wide task manager.
//!
//! The composition root installs its manager once; everything else reaches
//! it through `get_instance`. Without an install, the first access builds a
//! default manager.

use std::sync::{Arc, OnceLock};

use super::error::{SchedulerResult, TaskError};
use super::manager::TaskManager;

static INSTANCE: OnceLock<Arc<TaskManager>> = OnceLock::new();

/// Register the process-wide manager. Fails with the rejected manager if one
/// is already in place.
pub fn install(manager: Arc<TaskManager>) -> Result<(), Arc<TaskManager>> {
    INSTANCE.set(manager)
}

/// Shared manager for async callers
pub async fn get_instance() -> Arc<TaskManager> {
    instance()
}

/// Shared manager for sync callers. Tasks submitted through it need a
/// runtime, so calling this outside one is an error.
pub fn get_instance_sync() -> SchedulerResult<Arc<TaskManager>> {
    if tokio::runtime::Handle::try_current().is_err() {
        return Err(TaskError::InvalidState(
            "get_instance_sync must be called inside a tokio runtime".to_string(),
        ));
    }
    Ok(instance())
}

fn instance() -> Arc<TaskManager> {
    Arc::clone(INSTANCE.get_or_init(|| {
        log::debug!("Initializing default task manager");
        Arc::new(TaskManager::new())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    // The singleton is process-wide, so every check that touches it lives in
    // one test.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_instance() {
        let first = get_instance().await;

        let lookups: Vec<_> = (0..8)
            .map(|_| tokio::spawn(async { get_instance().await }))
            .collect();
        for lookup in lookups {
            assert!(Arc::ptr_eq(&first, &lookup.await.unwrap()));
        }

        // A plain OS thread has no runtime context
        let sync = std::thread::spawn(get_instance_sync).join().unwrap();
        assert!(sync.is_err());
        assert!(Arc::ptr_eq(&first, &get_instance_sync().unwrap()));

        assert!(install(Arc::new(TaskManager::new())).is_err());
    }

    #[test]
    fn test_sync_access_needs_runtime() {
        assert!(get_instance_sync().unwrap_err().is_invalid_state());
    }
}
