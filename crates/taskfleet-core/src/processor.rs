//! Task-processor runtime info and per-processor configuration.

use crate::{ProcessorId, ProcessorState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Concurrency settings for one task type on one processor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTypeSettings {
    /// Maximum concurrent tasks of this type. `None` means unlimited.
    pub max_workers: Option<u32>,
}

/// Configuration of a polling-queue lane served by a processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingQueueConfig {
    /// Queue key tasks are routed by.
    pub key: String,

    /// Maximum concurrent tasks drawn from this queue. `None` means unlimited.
    pub max_workers: Option<u32>,

    /// Poll interval in milliseconds.
    pub poll_interval_ms: u64,
}

/// Per-processor configuration snapshot, refreshed on configuration-changed
/// notifications.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Global cap on concurrent tasks. `None` means unlimited.
    pub max_workers: Option<u32>,

    /// Per-task-type caps, keyed by task type.
    pub task_types: HashMap<String, TaskTypeSettings>,

    /// Polling-queue lanes this processor serves.
    pub polling_queues: Vec<PollingQueueConfig>,
}

impl ProcessorConfig {
    /// Cap for a given task type, if one is configured.
    pub fn max_workers_for_type(&self, task_type: &str) -> Option<u32> {
        self.task_types.get(task_type).and_then(|s| s.max_workers)
    }
}

/// Runtime information about a registered task-processor node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProcessorRuntimeInfo {
    /// Unique processor identifier.
    pub id: ProcessorId,

    /// Hostname of the processor machine.
    pub host_name: String,

    /// Current lifecycle state.
    pub state: ProcessorState,

    /// Configuration snapshot.
    pub config: ProcessorConfig,

    /// When the processor registered.
    pub registered_at: DateTime<Utc>,
}

impl TaskProcessorRuntimeInfo {
    /// Create a newly registered (Active) processor record.
    pub fn new(id: ProcessorId, host_name: impl Into<String>) -> Self {
        Self {
            id,
            host_name: host_name.into(),
            state: ProcessorState::Active,
            config: ProcessorConfig::default(),
            registered_at: Utc::now(),
        }
    }

    /// Builder method to set the global max-workers cap.
    pub fn with_max_workers(mut self, max: u32) -> Self {
        self.config.max_workers = Some(max);
        self
    }

    /// Builder method to cap one task type.
    pub fn with_task_type_cap(mut self, task_type: impl Into<String>, max: u32) -> Self {
        self.config.task_types.insert(
            task_type.into(),
            TaskTypeSettings {
                max_workers: Some(max),
            },
        );
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_cap_lookup() {
        let proc = TaskProcessorRuntimeInfo::new(ProcessorId::new("p1"), "host-a")
            .with_max_workers(4)
            .with_task_type_cap("report", 2);

        assert_eq!(proc.config.max_workers, Some(4));
        assert_eq!(proc.config.max_workers_for_type("report"), Some(2));
        assert_eq!(proc.config.max_workers_for_type("unknown"), None);
    }
}
