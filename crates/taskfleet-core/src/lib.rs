//! TaskFleet Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - Network/message-bus transports
//! - Database
//! - Runtime specifics
//!
//! All types here represent the core business domain of TaskFleet: tasks,
//! task processors, and the master coordination commands exchanged between
//! them.

pub mod command;
pub mod error;
pub mod ids;
pub mod processor;
pub mod status;
pub mod task;

// Re-export commonly used types
pub use command::{MasterCommand, MasterCommandEnvelope};
pub use error::CoreError;
pub use ids::{MessageId, ProcessorId, TaskId};
pub use processor::{PollingQueueConfig, ProcessorConfig, TaskProcessorRuntimeInfo, TaskTypeSettings};
pub use status::{ProcessorState, TaskPriority, TaskStatus};
pub use task::TaskRuntimeInfo;
