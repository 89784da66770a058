//! Pending assignment handshake table.
//!
//! Assignment is a request/response over an async bus: the master inserts a
//! single-resolution waiter keyed by task id, notifies the processor, then
//! awaits confirmation with a timeout. Confirmation arrives on a different
//! task than the one awaiting, so the table must be concurrent-safe.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use taskfleet_core::{ProcessorId, TaskId};

/// Concurrent map from task id to the waiter for its start confirmation.
///
/// An entry exists only while an assignment attempt is outstanding.
#[derive(Debug, Default)]
pub struct AssignmentHandshakes {
    pending: Mutex<HashMap<TaskId, oneshot::Sender<ProcessorId>>>,
}

impl AssignmentHandshakes {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `task_id`.
    ///
    /// Must be called before the assignment notification is dispatched, so
    /// a fast confirmation cannot race past the insert. A previous waiter
    /// for the same task, if any, is dropped (its await resolves as
    /// canceled).
    pub fn register(&self, task_id: TaskId) -> oneshot::Receiver<ProcessorId> {
        let (tx, rx) = oneshot::channel();
        // Lock is never held across an await point.
        self.pending
            .lock()
            .expect("handshake lock poisoned")
            .insert(task_id, tx);
        rx
    }

    /// Resolve the waiter for `task_id`, if one is outstanding.
    ///
    /// Called from the confirmation path when a processor reports the task
    /// started. Returns true if a waiter was resolved.
    pub fn complete(&self, task_id: &TaskId, processor_id: ProcessorId) -> bool {
        let waiter = self
            .pending
            .lock()
            .expect("handshake lock poisoned")
            .remove(task_id);
        match waiter {
            Some(tx) => tx.send(processor_id).is_ok(),
            None => false,
        }
    }

    /// Drop the waiter for `task_id`, if any. Called after the awaiting side
    /// finishes, confirmed or timed out.
    pub fn remove(&self, task_id: &TaskId) {
        self.pending
            .lock()
            .expect("handshake lock poisoned")
            .remove(task_id);
    }

    /// Number of outstanding assignment attempts.
    pub fn len(&self) -> usize {
        self.pending.lock().expect("handshake lock poisoned").len()
    }

    /// Whether no assignment attempt is outstanding.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_complete_resolves_registered_waiter() {
        let table = AssignmentHandshakes::new();
        let task_id = TaskId::new("t1");
        let rx = table.register(task_id.clone());

        assert!(table.complete(&task_id, ProcessorId::new("p1")));
        assert_eq!(rx.await.unwrap(), ProcessorId::new("p1"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_complete_without_waiter_is_noop() {
        let table = AssignmentHandshakes::new();
        assert!(!table.complete(&TaskId::new("t1"), ProcessorId::new("p1")));
    }

    #[tokio::test]
    async fn test_remove_cancels_waiter() {
        let table = AssignmentHandshakes::new();
        let task_id = TaskId::new("t1");
        let rx = table.register(task_id.clone());

        table.remove(&task_id);
        assert!(rx.await.is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_reregister_replaces_previous_waiter() {
        let table = AssignmentHandshakes::new();
        let task_id = TaskId::new("t1");
        let _first = table.register(task_id.clone());
        let _second = table.register(task_id.clone());
        assert_eq!(table.len(), 1);
    }
}
