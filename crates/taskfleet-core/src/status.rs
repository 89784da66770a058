//! Status and priority enums for Tasks and Task Processors.

use serde::{Deserialize, Serialize};

/// Status of a Task in the fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Task submitted but not yet confirmed running on a processor.
    #[default]
    Pending,
    /// Task actively executing on a processor.
    InProgress,
    /// Task was canceled by a client and acknowledged by the processor.
    Canceled,
    /// Task failed with an execution error.
    Failed,
    /// Task completed successfully.
    Success,
}

impl TaskStatus {
    /// Returns true if the status is terminal and can never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Canceled | Self::Failed | Self::Success)
    }

    /// Returns true if the task still occupies (or may occupy) a processor slot.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// Scheduling priority of a Task.
///
/// Ordering is by urgency: `Low < Normal < High < VeryHigh`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    VeryHigh,
}

/// Lifecycle state of a task-processor node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessorState {
    /// Processor is not registered or has shut down.
    #[default]
    Inactive,
    /// Processor is registered and accepting assignments.
    Active,
    /// Processor is draining; it finishes in-flight tasks but takes no new ones.
    Stopping,
}

impl ProcessorState {
    /// Returns true if the processor can accept new assignments.
    pub fn can_accept_tasks(&self) -> bool {
        matches!(self, Self::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::VeryHigh > TaskPriority::High);
        assert!(TaskPriority::High > TaskPriority::Normal);
        assert!(TaskPriority::Normal > TaskPriority::Low);
    }

    #[test]
    fn test_stopping_processor_accepts_nothing() {
        assert!(ProcessorState::Active.can_accept_tasks());
        assert!(!ProcessorState::Stopping.can_accept_tasks());
        assert!(!ProcessorState::Inactive.can_accept_tasks());
    }
}
