//! In-memory implementations of the consumed contracts.
//!
//! Suitable for single-process hosting and as the test substrate. The
//! stores keep a per-record sequence number so arrival order survives the
//! hash maps.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

use taskfleet_core::{
    CoreError, MasterCommandEnvelope, MessageId, ProcessorId, ProcessorState, TaskId,
    TaskProcessorRuntimeInfo, TaskRuntimeInfo, TaskStatus,
};

use crate::bus::{
    validate_error_text, validate_percent, MasterCommandQueue, ProcessorEvent, ProcessorEventBus,
    TaskEvent, TaskEventBus,
};
use crate::error::MasterError;
use crate::repository::{ProcessorRegistry, TaskRuntimeRepository};

const EVENT_BUS_CAPACITY: usize = 256;

/// In-memory [`TaskRuntimeRepository`].
#[derive(Default)]
pub struct InMemoryTaskStore {
    inner: RwLock<HashMap<TaskId, (u64, TaskRuntimeInfo)>>,
    next_seq: AtomicU64,
}

impl InMemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    async fn sorted_filter(
        &self,
        keep: impl Fn(&TaskRuntimeInfo) -> bool,
    ) -> Vec<TaskRuntimeInfo> {
        let inner = self.inner.read().await;
        let mut rows: Vec<(u64, TaskRuntimeInfo)> = inner
            .values()
            .filter(|(_, t)| keep(t))
            .cloned()
            .collect();
        rows.sort_by_key(|(seq, _)| *seq);
        rows.into_iter().map(|(_, t)| t).collect()
    }

    async fn mutate(
        &self,
        task_id: &TaskId,
        apply: impl FnOnce(&mut TaskRuntimeInfo) -> Result<(), CoreError>,
    ) -> Result<(), MasterError> {
        let mut inner = self.inner.write().await;
        let (_, task) = inner
            .get_mut(task_id)
            .ok_or_else(|| CoreError::TaskNotFound(task_id.to_string()))?;
        apply(task)?;
        Ok(())
    }
}

#[async_trait]
impl TaskRuntimeRepository for InMemoryTaskStore {
    async fn add(&self, task: TaskRuntimeInfo) -> Result<(), MasterError> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&task.id) {
            return Err(
                CoreError::InvalidInput(format!("task already exists: {}", task.id)).into(),
            );
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        inner.insert(task.id.clone(), (seq, task));
        Ok(())
    }

    async fn get_by_id(
        &self,
        task_id: &TaskId,
    ) -> Result<Option<TaskRuntimeInfo>, MasterError> {
        Ok(self.inner.read().await.get(task_id).map(|(_, t)| t.clone()))
    }

    async fn get_active(&self) -> Result<Vec<TaskRuntimeInfo>, MasterError> {
        // A pending task with an (optimistic) assignment occupies a slot too.
        Ok(self
            .sorted_filter(|t| t.status.is_active() && t.assigned_processor.is_some())
            .await)
    }

    async fn get_pending(&self) -> Result<Vec<TaskRuntimeInfo>, MasterError> {
        Ok(self
            .sorted_filter(|t| {
                t.status == TaskStatus::Pending && t.assigned_processor.is_none()
            })
            .await)
    }

    async fn get_pending_and_active(&self) -> Result<Vec<TaskRuntimeInfo>, MasterError> {
        Ok(self.sorted_filter(|t| t.status.is_active()).await)
    }

    async fn assign(
        &self,
        task_id: &TaskId,
        processor_id: Option<ProcessorId>,
    ) -> Result<(), MasterError> {
        self.mutate(task_id, |t| t.assign(processor_id)).await
    }

    async fn start(
        &self,
        task_id: &TaskId,
        at: DateTime<Utc>,
    ) -> Result<(), MasterError> {
        self.mutate(task_id, |t| t.start(at)).await
    }

    async fn progress(
        &self,
        task_id: &TaskId,
        percent: u8,
    ) -> Result<(), MasterError> {
        self.mutate(task_id, |t| t.set_progress(percent)).await
    }

    async fn fail(
        &self,
        task_id: &TaskId,
        at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), MasterError> {
        self.mutate(task_id, |t| t.fail(at, error)).await
    }

    async fn complete(
        &self,
        task_id: &TaskId,
        at: DateTime<Utc>,
    ) -> Result<(), MasterError> {
        self.mutate(task_id, |t| t.complete(at)).await
    }

    async fn cancel(
        &self,
        task_id: &TaskId,
        at: DateTime<Utc>,
    ) -> Result<(), MasterError> {
        self.mutate(task_id, |t| t.cancel(at)).await
    }
}

/// In-memory [`ProcessorRegistry`].
#[derive(Default)]
pub struct InMemoryProcessorRegistry {
    inner: RwLock<HashMap<ProcessorId, (u64, TaskProcessorRuntimeInfo)>>,
    master: RwLock<Option<ProcessorId>>,
    next_seq: AtomicU64,
}

impl InMemoryProcessorRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessorRegistry for InMemoryProcessorRegistry {
    async fn add(&self, processor: TaskProcessorRuntimeInfo) -> Result<(), MasterError> {
        let mut inner = self.inner.write().await;
        if inner.contains_key(&processor.id) {
            return Err(CoreError::InvalidInput(format!(
                "processor already registered: {}",
                processor.id
            ))
            .into());
        }
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        inner.insert(processor.id.clone(), (seq, processor));
        Ok(())
    }

    async fn update(&self, processor: TaskProcessorRuntimeInfo) -> Result<(), MasterError> {
        let mut inner = self.inner.write().await;
        let (_, existing) = inner
            .get_mut(&processor.id)
            .ok_or_else(|| CoreError::ProcessorNotFound(processor.id.to_string()))?;
        *existing = processor;
        Ok(())
    }

    async fn get_all(&self) -> Result<Vec<TaskProcessorRuntimeInfo>, MasterError> {
        let inner = self.inner.read().await;
        let mut rows: Vec<(u64, TaskProcessorRuntimeInfo)> = inner.values().cloned().collect();
        rows.sort_by_key(|(seq, _)| *seq);
        Ok(rows.into_iter().map(|(_, p)| p).collect())
    }

    async fn get_by_id(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<Option<TaskProcessorRuntimeInfo>, MasterError> {
        Ok(self
            .inner
            .read()
            .await
            .get(processor_id)
            .map(|(_, p)| p.clone()))
    }

    async fn get_master_id(&self) -> Result<Option<ProcessorId>, MasterError> {
        Ok(self.master.read().await.clone())
    }

    async fn set_master(&self, processor_id: &ProcessorId) -> Result<(), MasterError> {
        if self.inner.read().await.get(processor_id).is_none() {
            return Err(CoreError::ProcessorNotFound(processor_id.to_string()).into());
        }
        *self.master.write().await = Some(processor_id.clone());
        Ok(())
    }

    async fn remove(&self, processor_id: &ProcessorId) -> Result<(), MasterError> {
        self.inner.write().await.remove(processor_id);
        let mut master = self.master.write().await;
        if master.as_ref() == Some(processor_id) {
            *master = None;
        }
        Ok(())
    }
}

/// In-memory [`MasterCommandQueue`] with message-id de-duplication.
pub struct InMemoryMasterQueue {
    queue: Mutex<VecDeque<MasterCommandEnvelope>>,
    seen: Mutex<HashSet<MessageId>>,
    receive: AtomicBool,
    received_tx: broadcast::Sender<()>,
}

impl InMemoryMasterQueue {
    /// Create an empty queue. Received-notifications start enabled.
    pub fn new() -> Self {
        let (received_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self {
            queue: Mutex::new(VecDeque::new()),
            seen: Mutex::new(HashSet::new()),
            receive: AtomicBool::new(true),
            received_tx,
        }
    }

    /// Number of queued envelopes.
    pub fn len(&self) -> usize {
        self.queue.lock().expect("queue lock poisoned").len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryMasterQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MasterCommandQueue for InMemoryMasterQueue {
    async fn push(&self, envelope: MasterCommandEnvelope) -> Result<(), MasterError> {
        {
            let mut seen = self.seen.lock().expect("queue lock poisoned");
            if !seen.insert(envelope.message_id.clone()) {
                debug!(message_id = %envelope.message_id, "Dropping redelivered master command");
                return Ok(());
            }
        }
        self.queue
            .lock()
            .expect("queue lock poisoned")
            .push_back(envelope);
        if self.receive.load(Ordering::Acquire) {
            // No receivers is fine; the master may be inactive.
            let _ = self.received_tx.send(());
        }
        Ok(())
    }

    async fn pop_first(&self) -> Result<Option<MasterCommandEnvelope>, MasterError> {
        Ok(self.queue.lock().expect("queue lock poisoned").pop_front())
    }

    fn set_receive_messages(&self, receive: bool) {
        self.receive.store(receive, Ordering::Release);
    }

    fn receive_messages(&self) -> bool {
        self.receive.load(Ordering::Acquire)
    }

    fn subscribe_received(&self) -> broadcast::Receiver<()> {
        self.received_tx.subscribe()
    }
}

/// In-memory [`TaskEventBus`] over a broadcast channel.
pub struct InMemoryTaskBus {
    tx: broadcast::Sender<TaskEvent>,
}

impl InMemoryTaskBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    fn publish(&self, event: TaskEvent) -> Result<(), MasterError> {
        // No receivers is fine; notifications are fire-and-forget.
        let _ = self.tx.send(event);
        Ok(())
    }

    /// Number of attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for InMemoryTaskBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskEventBus for InMemoryTaskBus {
    async fn notify_task_assigned(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
    ) -> Result<(), MasterError> {
        self.publish(TaskEvent::Assigned {
            task_id: task_id.clone(),
            processor_id: processor_id.clone(),
        })
    }

    async fn notify_task_started(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
    ) -> Result<(), MasterError> {
        self.publish(TaskEvent::Started {
            task_id: task_id.clone(),
            processor_id: processor_id.clone(),
            at,
        })
    }

    async fn notify_task_progress(
        &self,
        task_id: &TaskId,
        percent: u8,
    ) -> Result<(), MasterError> {
        validate_percent(percent)?;
        self.publish(TaskEvent::Progress {
            task_id: task_id.clone(),
            percent,
        })
    }

    async fn notify_task_cancel_requested(
        &self,
        task_id: &TaskId,
    ) -> Result<(), MasterError> {
        self.publish(TaskEvent::CancelRequested {
            task_id: task_id.clone(),
        })
    }

    async fn notify_task_cancel_completed(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError> {
        self.publish(TaskEvent::CancelCompleted {
            task_id: task_id.clone(),
            processor_id: processor_id.clone(),
            at,
            is_processor_stopping,
        })
    }

    async fn notify_task_failed(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
        error: &str,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError> {
        validate_error_text(error)?;
        self.publish(TaskEvent::Failed {
            task_id: task_id.clone(),
            processor_id: processor_id.clone(),
            at,
            error: error.to_string(),
            is_processor_stopping,
        })
    }

    async fn notify_task_completed(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
        total_cpu_ms: u64,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError> {
        self.publish(TaskEvent::Completed {
            task_id: task_id.clone(),
            processor_id: processor_id.clone(),
            at,
            total_cpu_ms,
            is_processor_stopping,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

/// In-memory [`ProcessorEventBus`] over a broadcast channel.
pub struct InMemoryProcessorBus {
    tx: broadcast::Sender<ProcessorEvent>,
}

impl InMemoryProcessorBus {
    /// Create a bus with the default capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    fn publish(&self, event: ProcessorEvent) -> Result<(), MasterError> {
        let _ = self.tx.send(event);
        Ok(())
    }
}

impl Default for InMemoryProcessorBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessorEventBus for InMemoryProcessorBus {
    async fn notify_state_changed(
        &self,
        processor_id: &ProcessorId,
        state: ProcessorState,
    ) -> Result<(), MasterError> {
        self.publish(ProcessorEvent::StateChanged {
            processor_id: processor_id.clone(),
            state,
        })
    }

    async fn notify_master_mode_change_requested(
        &self,
        processor_id: &ProcessorId,
        is_master: bool,
    ) -> Result<(), MasterError> {
        self.publish(ProcessorEvent::MasterModeChangeRequested {
            processor_id: processor_id.clone(),
            is_master,
        })
    }

    async fn notify_master_mode_changed(
        &self,
        processor_id: &ProcessorId,
        is_master: bool,
    ) -> Result<(), MasterError> {
        self.publish(ProcessorEvent::MasterModeChanged {
            processor_id: processor_id.clone(),
            is_master,
        })
    }

    async fn notify_stop_requested(&self, processor_id: &ProcessorId) -> Result<(), MasterError> {
        self.publish(ProcessorEvent::StopRequested {
            processor_id: processor_id.clone(),
        })
    }

    async fn notify_configuration_changed(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<(), MasterError> {
        self.publish(ProcessorEvent::ConfigurationChanged {
            processor_id: processor_id.clone(),
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.tx.subscribe()
    }
}
