//! Scheduler Configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::error::{SchedulerResult, TaskError};

/// Task manager settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskManagerConfig {
    /// Capacity of the lifecycle event broadcast channel
    pub event_capacity: usize,
    /// How long `shutdown` waits for cancelled work to drain
    pub shutdown_grace_ms: u64,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 256,
            shutdown_grace_ms: 5000,
        }
    }
}

impl TaskManagerConfig {
    /// Parse settings from TOML text
    pub fn from_toml_str(text: &str) -> SchedulerResult<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load settings from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.event_capacity == 0 {
            return Err(TaskError::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_for_missing_keys() {
        let config = TaskManagerConfig::from_toml_str("shutdown_grace_ms = 250").unwrap();
        assert_eq!(config.event_capacity, 256);
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = TaskManagerConfig::from_toml_str("event_capacity = 0");
        assert!(matches!(result, Err(TaskError::InvalidConfig(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let result = TaskManagerConfig::from_toml_str("event_capacity = \"lots\"");
        assert!(matches!(result, Err(TaskError::InvalidConfig(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "event_capacity = 16").unwrap();
        writeln!(file, "shutdown_grace_ms = 100").unwrap();

        let config = TaskManagerConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config,
            TaskManagerConfig {
                event_capacity: 16,
                shutdown_grace_ms: 100,
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let result = TaskManagerConfig::from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(TaskError::Io(_))));
    }
}
