//! Message-bus contracts consumed by the master engine.
//!
//! Transport is external: the core only needs push/pop semantics on the
//! master command queue and multicast notify/subscribe semantics on the
//! task and processor event buses. Subscriptions hand out broadcast
//! receivers so handlers can be attached and dropped independently.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use taskfleet_core::{
    CoreError, MasterCommandEnvelope, ProcessorId, ProcessorState, TaskId,
};

use crate::error::MasterError;

/// Notification published on the task event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    /// Master assigned the task to a processor.
    Assigned {
        task_id: TaskId,
        processor_id: ProcessorId,
    },
    /// Processor confirmed the task started executing.
    Started {
        task_id: TaskId,
        processor_id: ProcessorId,
        at: DateTime<Utc>,
    },
    /// Processor reported execution progress.
    Progress { task_id: TaskId, percent: u8 },
    /// A client requested cancellation.
    CancelRequested { task_id: TaskId },
    /// Processor acknowledged cancellation.
    CancelCompleted {
        task_id: TaskId,
        processor_id: ProcessorId,
        at: DateTime<Utc>,
        is_processor_stopping: bool,
    },
    /// Processor reported an execution error.
    Failed {
        task_id: TaskId,
        processor_id: ProcessorId,
        at: DateTime<Utc>,
        error: String,
        is_processor_stopping: bool,
    },
    /// Processor reported successful completion.
    Completed {
        task_id: TaskId,
        processor_id: ProcessorId,
        at: DateTime<Utc>,
        total_cpu_ms: u64,
        is_processor_stopping: bool,
    },
}

/// Notification published on the processor event bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessorEvent {
    /// A processor's lifecycle state changed.
    StateChanged {
        processor_id: ProcessorId,
        state: ProcessorState,
    },
    /// Request a processor to enter or leave master mode.
    MasterModeChangeRequested {
        processor_id: ProcessorId,
        is_master: bool,
    },
    /// A processor entered or left master mode.
    MasterModeChanged {
        processor_id: ProcessorId,
        is_master: bool,
    },
    /// Request a processor to stop (drain and shut down).
    StopRequested { processor_id: ProcessorId },
    /// A processor's configuration snapshot changed.
    ConfigurationChanged { processor_id: ProcessorId },
}

/// Master command queue contract.
///
/// At-least-once delivery: the transport may redeliver, so implementations
/// de-duplicate by the envelope's message id. `pop_first` returns `None`
/// when the queue is empty.
#[async_trait]
pub trait MasterCommandQueue: Send + Sync {
    /// Push a command envelope onto the queue.
    async fn push(&self, envelope: MasterCommandEnvelope) -> Result<(), MasterError>;

    /// Pop the oldest queued envelope, if any.
    async fn pop_first(&self) -> Result<Option<MasterCommandEnvelope>, MasterError>;

    /// Gate whether the queue raises received-notifications.
    fn set_receive_messages(&self, receive: bool);

    /// Whether received-notifications are currently raised.
    fn receive_messages(&self) -> bool;

    /// Subscribe to received-notifications: one unit per accepted push.
    fn subscribe_received(&self) -> broadcast::Receiver<()>;
}

/// Task event bus sender contract.
#[async_trait]
pub trait TaskEventBus: Send + Sync {
    /// Notify that the master assigned `task_id` to `processor_id`.
    async fn notify_task_assigned(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
    ) -> Result<(), MasterError>;

    /// Notify that the processor started executing the task.
    async fn notify_task_started(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
    ) -> Result<(), MasterError>;

    /// Notify execution progress. `percent` must be in [0, 100].
    async fn notify_task_progress(
        &self,
        task_id: &TaskId,
        percent: u8,
    ) -> Result<(), MasterError>;

    /// Notify that a client requested cancellation.
    async fn notify_task_cancel_requested(&self, task_id: &TaskId) -> Result<(), MasterError>;

    /// Notify that the processor acknowledged cancellation.
    async fn notify_task_cancel_completed(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError>;

    /// Notify an execution failure. `error` must be non-empty.
    async fn notify_task_failed(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
        error: &str,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError>;

    /// Notify successful completion with accumulated CPU time.
    async fn notify_task_completed(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
        total_cpu_ms: u64,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError>;

    /// Subscribe to task events.
    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;
}

/// Processor event bus sender contract.
#[async_trait]
pub trait ProcessorEventBus: Send + Sync {
    /// Notify a processor lifecycle-state change.
    async fn notify_state_changed(
        &self,
        processor_id: &ProcessorId,
        state: ProcessorState,
    ) -> Result<(), MasterError>;

    /// Ask a processor to enter or leave master mode.
    async fn notify_master_mode_change_requested(
        &self,
        processor_id: &ProcessorId,
        is_master: bool,
    ) -> Result<(), MasterError>;

    /// Announce that a processor entered or left master mode.
    async fn notify_master_mode_changed(
        &self,
        processor_id: &ProcessorId,
        is_master: bool,
    ) -> Result<(), MasterError>;

    /// Ask a processor to drain and stop.
    async fn notify_stop_requested(&self, processor_id: &ProcessorId) -> Result<(), MasterError>;

    /// Announce a configuration change for a processor.
    async fn notify_configuration_changed(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<(), MasterError>;

    /// Subscribe to processor events.
    fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent>;
}

/// Boundary validation for progress notifications.
pub(crate) fn validate_percent(percent: u8) -> Result<(), MasterError> {
    if percent > 100 {
        return Err(CoreError::InvalidInput(format!(
            "progress percentage out of range: {percent}"
        ))
        .into());
    }
    Ok(())
}

/// Boundary validation for failure notifications.
pub(crate) fn validate_error_text(error: &str) -> Result<(), MasterError> {
    if error.is_empty() {
        return Err(CoreError::InvalidInput(
            "failure error description must not be empty".to_string(),
        )
        .into());
    }
    Ok(())
}
