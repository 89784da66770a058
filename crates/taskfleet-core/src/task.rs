//! Task runtime info - the per-task record the master coordinates on.

use crate::{CoreError, ProcessorId, TaskId, TaskPriority, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Runtime information about a single task.
///
/// Created on submission, mutated by assignment, progress, and terminal
/// transitions. Once a terminal status is reached the record is read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRuntimeInfo {
    /// Unique task identifier.
    pub id: TaskId,

    /// Task type key, used for per-type concurrency caps.
    pub task_type: String,

    /// Polling-queue lane this task is routed through, if any.
    pub polling_queue: Option<String>,

    /// Scheduling priority.
    pub priority: TaskPriority,

    /// Current status.
    pub status: TaskStatus,

    /// Processor this task is currently assigned to, if any.
    pub assigned_processor: Option<ProcessorId>,

    /// Progress percentage in [0, 100].
    pub progress: u8,

    /// When the task was submitted.
    pub submitted_at: DateTime<Utc>,

    /// When the processor confirmed the task started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the task was canceled.
    pub canceled_at: Option<DateTime<Utc>>,

    /// When the task finished (success or failure).
    pub completed_at: Option<DateTime<Utc>>,

    /// Error description if the task failed.
    pub error: Option<String>,
}

impl TaskRuntimeInfo {
    /// Create a new pending task.
    pub fn new(task_type: impl Into<String>) -> Self {
        Self {
            id: TaskId::generate(),
            task_type: task_type.into(),
            polling_queue: None,
            priority: TaskPriority::Normal,
            status: TaskStatus::Pending,
            assigned_processor: None,
            progress: 0,
            submitted_at: Utc::now(),
            started_at: None,
            canceled_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Builder method to set a specific ID (useful for testing).
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to route the task through a polling queue.
    pub fn with_polling_queue(mut self, key: impl Into<String>) -> Self {
        self.polling_queue = Some(key.into());
        self
    }

    /// Check if the task is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Record an assignment decision. `None` clears the assignment.
    ///
    /// Valid only while the task is not terminal.
    pub fn assign(&mut self, processor: Option<ProcessorId>) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(self.transition_error("Assigned"));
        }
        self.assigned_processor = processor;
        Ok(())
    }

    /// Processor confirmed the task started: Pending -> InProgress.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != TaskStatus::Pending {
            return Err(self.transition_error("InProgress"));
        }
        self.status = TaskStatus::InProgress;
        self.started_at = Some(at);
        Ok(())
    }

    /// Update the progress percentage.
    pub fn set_progress(&mut self, percent: u8) -> Result<(), CoreError> {
        if percent > 100 {
            return Err(CoreError::InvalidInput(format!(
                "progress percentage out of range: {percent}"
            )));
        }
        if self.is_terminal() {
            return Err(self.transition_error("Progress"));
        }
        self.progress = percent;
        Ok(())
    }

    /// Terminal transition: InProgress -> Success.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.transition_error("Success"));
        }
        self.status = TaskStatus::Success;
        self.progress = 100;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Terminal transition: InProgress -> Failed, with a non-empty error.
    pub fn fail(&mut self, at: DateTime<Utc>, error: impl Into<String>) -> Result<(), CoreError> {
        let error = error.into();
        if error.is_empty() {
            return Err(CoreError::InvalidInput(
                "failure error description must not be empty".to_string(),
            ));
        }
        if self.is_terminal() {
            return Err(self.transition_error("Failed"));
        }
        self.status = TaskStatus::Failed;
        self.completed_at = Some(at);
        self.error = Some(error);
        Ok(())
    }

    /// Terminal transition: -> Canceled.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        if self.is_terminal() {
            return Err(self.transition_error("Canceled"));
        }
        self.status = TaskStatus::Canceled;
        self.canceled_at = Some(at);
        Ok(())
    }

    fn transition_error(&self, to: &str) -> CoreError {
        CoreError::InvalidStateTransition {
            from: format!("{:?}", self.status),
            to: to.to_string(),
        }
    }
}
