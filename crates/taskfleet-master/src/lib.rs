//! TaskFleet Master Coordination Engine
//!
//! The elected master's side of the fleet: draining the master command
//! queue, choosing processor/task pairings, and running the assignment
//! handshake. Transport and persistence stay behind the contracts in
//! [`bus`] and [`repository`]; [`memory`] provides in-process
//! implementations for single-node hosting and tests.

pub mod bus;
pub mod commands;
pub mod config;
pub mod distributor;
pub mod error;
pub mod handshake;
pub mod memory;
pub mod repository;

// Re-export commonly used types
pub use bus::{MasterCommandQueue, ProcessorEvent, ProcessorEventBus, TaskEvent, TaskEventBus};
pub use commands::MasterCommandsProcessor;
pub use config::MasterConfig;
pub use distributor::{BalancedDistributor, SimpleDistributor, TaskDistributor};
pub use error::MasterError;
pub use handshake::AssignmentHandshakes;
pub use memory::{
    InMemoryMasterQueue, InMemoryProcessorBus, InMemoryProcessorRegistry, InMemoryTaskBus,
    InMemoryTaskStore,
};
pub use repository::{ProcessorRegistry, TaskRuntimeRepository};
