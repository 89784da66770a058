//! Master coordination commands.
//!
//! Task processors post these onto the master command queue; the elected
//! master drains the queue and reacts. Commands are a tagged union rather
//! than a class hierarchy: terminal lifecycle variants share the common
//! fields (task id, processor id, stopping flag) and carry their own extras.

use crate::{MessageId, ProcessorId, TaskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A coordination command for the master.
///
/// Marked non-exhaustive: the dispatcher must tolerate (log and ignore)
/// command kinds it does not understand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum MasterCommand {
    /// A client submitted a new task; the master should place it.
    TaskSubmitted { task_id: TaskId },

    /// A processor finished a task successfully.
    TaskCompleted {
        task_id: TaskId,
        processor_id: ProcessorId,
        finished_at: DateTime<Utc>,
        /// Total CPU time consumed, in milliseconds.
        total_cpu_ms: u64,
        is_processor_stopping: bool,
    },

    /// A processor reports an unhandled execution error.
    TaskFailed {
        task_id: TaskId,
        processor_id: ProcessorId,
        finished_at: DateTime<Utc>,
        /// Non-empty error description.
        error: String,
        is_processor_stopping: bool,
    },

    /// A processor acknowledged a cancellation request.
    TaskCancelCompleted {
        task_id: TaskId,
        processor_id: ProcessorId,
        finished_at: DateTime<Utc>,
        is_processor_stopping: bool,
    },

    /// A processor's configuration snapshot changed; its slot budget may
    /// have changed with it.
    ConfigurationChanged { processor_id: ProcessorId },

    /// A new processor registered with the fleet.
    TaskProcessorRegistered { processor_id: ProcessorId },
}

impl MasterCommand {
    /// Short human-readable command kind for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskSubmitted { .. } => "TaskSubmitted",
            Self::TaskCompleted { .. } => "TaskCompleted",
            Self::TaskFailed { .. } => "TaskFailed",
            Self::TaskCancelCompleted { .. } => "TaskCancelCompleted",
            Self::ConfigurationChanged { .. } => "ConfigurationChanged",
            Self::TaskProcessorRegistered { .. } => "TaskProcessorRegistered",
        }
    }
}

/// Bus envelope around a [`MasterCommand`].
///
/// The message id is stable across redeliveries so the queue can
/// de-duplicate; the bus is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterCommandEnvelope {
    /// Stable unique message id.
    pub message_id: MessageId,

    /// When the command was issued by its producer.
    pub issued_at: DateTime<Utc>,

    /// The command payload.
    pub command: MasterCommand,
}

impl MasterCommandEnvelope {
    /// Wrap a command in a fresh envelope.
    pub fn new(command: MasterCommand) -> Self {
        Self {
            message_id: MessageId::generate(),
            issued_at: Utc::now(),
            command,
        }
    }
}
