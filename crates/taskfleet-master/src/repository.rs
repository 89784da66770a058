//! Persistence contracts consumed by the master engine.
//!
//! Backends are external collaborators; the core only needs typed CRUD and
//! a handful of query shapes (pending, active, by-id). Implementations are
//! assumed thread-safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use taskfleet_core::{ProcessorId, TaskId, TaskProcessorRuntimeInfo, TaskRuntimeInfo};

use crate::error::MasterError;

/// Storage for task runtime info.
#[async_trait]
pub trait TaskRuntimeRepository: Send + Sync {
    /// Store a newly submitted task.
    async fn add(&self, task: TaskRuntimeInfo) -> Result<(), MasterError>;

    /// Fetch a task by id.
    async fn get_by_id(&self, task_id: &TaskId) -> Result<Option<TaskRuntimeInfo>, MasterError>;

    /// All tasks currently occupying processor slots (Pending or InProgress
    /// with an assignment, or InProgress).
    async fn get_active(&self) -> Result<Vec<TaskRuntimeInfo>, MasterError>;

    /// All unassigned Pending tasks, in arrival order.
    async fn get_pending(&self) -> Result<Vec<TaskRuntimeInfo>, MasterError>;

    /// Union of pending and active tasks, in arrival order.
    async fn get_pending_and_active(&self) -> Result<Vec<TaskRuntimeInfo>, MasterError>;

    /// Record an assignment decision. `None` clears the assignment.
    async fn assign(
        &self,
        task_id: &TaskId,
        processor_id: Option<ProcessorId>,
    ) -> Result<(), MasterError>;

    /// Pending -> InProgress on processor confirmation.
    async fn start(&self, task_id: &TaskId, at: DateTime<Utc>) -> Result<(), MasterError>;

    /// Update progress percentage.
    async fn progress(&self, task_id: &TaskId, percent: u8) -> Result<(), MasterError>;

    /// Terminal transition to Failed with a non-empty error.
    async fn fail(&self, task_id: &TaskId, at: DateTime<Utc>, error: &str)
        -> Result<(), MasterError>;

    /// Terminal transition to Success.
    async fn complete(&self, task_id: &TaskId, at: DateTime<Utc>) -> Result<(), MasterError>;

    /// Terminal transition to Canceled.
    async fn cancel(&self, task_id: &TaskId, at: DateTime<Utc>) -> Result<(), MasterError>;
}

/// Registry of task-processor nodes.
#[async_trait]
pub trait ProcessorRegistry: Send + Sync {
    /// Register a processor.
    async fn add(&self, processor: TaskProcessorRuntimeInfo) -> Result<(), MasterError>;

    /// Replace a processor's record (configuration/heartbeat refresh).
    async fn update(&self, processor: TaskProcessorRuntimeInfo) -> Result<(), MasterError>;

    /// All registered processors.
    async fn get_all(&self) -> Result<Vec<TaskProcessorRuntimeInfo>, MasterError>;

    /// Fetch a processor by id.
    async fn get_by_id(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<Option<TaskProcessorRuntimeInfo>, MasterError>;

    /// Id of the currently elected master, if any.
    async fn get_master_id(&self) -> Result<Option<ProcessorId>, MasterError>;

    /// Record the elected master.
    async fn set_master(&self, processor_id: &ProcessorId) -> Result<(), MasterError>;

    /// Remove a processor (stop or crash detection).
    async fn remove(&self, processor_id: &ProcessorId) -> Result<(), MasterError>;
}
