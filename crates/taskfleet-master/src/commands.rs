//! Master commands processor - the coordination state machine.
//!
//! Runs only on the elected master. Drains the master command queue,
//! consults the [`TaskDistributor`] for placement, and pushes assignment
//! notifications back out through the task event bus. Assignment uses an
//! optimistic-assign + bounded-wait handshake: the repository records the
//! assignment before the processor confirms, and a dangling record left by
//! a timeout self-heals through later lifecycle events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use taskfleet_core::{CoreError, MasterCommand, ProcessorId, TaskId, TaskStatus};

use crate::bus::{MasterCommandQueue, ProcessorEventBus, TaskEvent, TaskEventBus};
use crate::config::MasterConfig;
use crate::distributor::TaskDistributor;
use crate::error::MasterError;
use crate::handshake::AssignmentHandshakes;
use crate::repository::{ProcessorRegistry, TaskRuntimeRepository};

/// Listener tasks owned by an active processor.
struct Listeners {
    started: JoinHandle<()>,
    commands: JoinHandle<()>,
}

/// Terminal outcome reported by a processor for a task.
enum TaskOutcome {
    Success,
    Failed { error: String },
    Canceled,
}

impl TaskOutcome {
    fn name(&self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::Failed { .. } => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

/// The master coordination engine.
///
/// Logically single-threaded: at most one drain of the command queue is in
/// flight, and commands are handled strictly in pop order. Confirmations
/// arrive on other tasks and meet the drain through the handshake table.
pub struct MasterCommandsProcessor {
    node_id: ProcessorId,
    queue: Arc<dyn MasterCommandQueue>,
    task_bus: Arc<dyn TaskEventBus>,
    processor_bus: Arc<dyn ProcessorEventBus>,
    tasks: Arc<dyn TaskRuntimeRepository>,
    registry: Arc<dyn ProcessorRegistry>,
    distributor: Arc<dyn TaskDistributor>,
    config: MasterConfig,
    handshakes: AssignmentHandshakes,
    /// Re-entrancy guard: at most one drain in flight.
    draining: AtomicBool,
    listeners: Mutex<Option<Listeners>>,
}

impl MasterCommandsProcessor {
    /// Create an inactive processor. Configuration is validated eagerly so
    /// misconfiguration fails at startup, not mid-loop.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: ProcessorId,
        queue: Arc<dyn MasterCommandQueue>,
        task_bus: Arc<dyn TaskEventBus>,
        processor_bus: Arc<dyn ProcessorEventBus>,
        tasks: Arc<dyn TaskRuntimeRepository>,
        registry: Arc<dyn ProcessorRegistry>,
        distributor: Arc<dyn TaskDistributor>,
        config: MasterConfig,
    ) -> Result<Arc<Self>, MasterError> {
        config.validate()?;
        Ok(Arc::new(Self {
            node_id,
            queue,
            task_bus,
            processor_bus,
            tasks,
            registry,
            distributor,
            config,
            handshakes: AssignmentHandshakes::new(),
            draining: AtomicBool::new(false),
            listeners: Mutex::new(None),
        }))
    }

    /// Whether this node is currently acting as master.
    pub fn is_active(&self) -> bool {
        self.listeners
            .lock()
            .expect("listener lock poisoned")
            .is_some()
    }

    /// Number of assignment attempts currently awaiting confirmation.
    pub fn pending_assignments(&self) -> usize {
        self.handshakes.len()
    }

    /// Enter or leave master mode. Setting the current value is a no-op.
    ///
    /// Activation subscribes to task-started events and queue-received
    /// notifications; deactivation unsubscribes from both. The change is
    /// announced on the processor event bus.
    pub async fn set_active(self: &Arc<Self>, active: bool) -> Result<(), MasterError> {
        if active {
            // Check-and-install in one critical section so concurrent
            // activations cannot each spawn a listener pair.
            {
                let mut slot = self.listeners.lock().expect("listener lock poisoned");
                if slot.is_some() {
                    return Ok(());
                }

                let started = {
                    let this = Arc::clone(self);
                    let mut rx = self.task_bus.subscribe();
                    tokio::spawn(async move {
                        loop {
                            match rx.recv().await {
                                Ok(TaskEvent::Started {
                                    task_id,
                                    processor_id,
                                    at,
                                }) => {
                                    this.on_assigned_task_started(&task_id, &processor_id, at)
                                        .await;
                                }
                                Ok(_) => {}
                                Err(RecvError::Lagged(skipped)) => {
                                    warn!(skipped, "Task event listener lagged");
                                }
                                Err(RecvError::Closed) => break,
                            }
                        }
                    })
                };

                let commands = {
                    let this = Arc::clone(self);
                    let mut rx = self.queue.subscribe_received();
                    tokio::spawn(async move {
                        loop {
                            match rx.recv().await {
                                Ok(()) | Err(RecvError::Lagged(_)) => {
                                    if let Err(err) = this.process_master_commands().await {
                                        if err.is_critical() {
                                            error!(error = %err, "Critical error in command loop");
                                            break;
                                        }
                                        warn!(error = %err, "Command drain failed");
                                    }
                                }
                                Err(RecvError::Closed) => break,
                            }
                        }
                    })
                };

                *slot = Some(Listeners { started, commands });
            }
            self.queue.set_receive_messages(true);
            info!(node_id = %self.node_id, "Master mode activated");
            self.processor_bus
                .notify_master_mode_changed(&self.node_id, true)
                .await?;

            // Drain whatever accumulated while this node was not master.
            self.process_master_commands().await?;
        } else {
            // Take under the lock: only the caller that removes the
            // listeners announces the deactivation.
            let Some(listeners) = self
                .listeners
                .lock()
                .expect("listener lock poisoned")
                .take()
            else {
                return Ok(());
            };
            self.queue.set_receive_messages(false);
            listeners.started.abort();
            listeners.commands.abort();
            info!(node_id = %self.node_id, "Master mode deactivated");
            self.processor_bus
                .notify_master_mode_changed(&self.node_id, false)
                .await?;
        }

        Ok(())
    }

    /// Drain the master command queue.
    ///
    /// Re-entrancy guarded: a concurrent call while a drain is already in
    /// flight returns immediately without processing anything. Stops when
    /// the queue is empty or the node leaves master mode mid-drain. Errors
    /// are isolated per command; critical errors abort the drain.
    pub async fn process_master_commands(&self) -> Result<(), MasterError> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Command drain already in flight");
            return Ok(());
        }

        // Reset on drop so a canceled drain does not wedge the guard.
        struct DrainGuard<'a>(&'a AtomicBool);
        impl Drop for DrainGuard<'_> {
            fn drop(&mut self) {
                self.0.store(false, Ordering::Release);
            }
        }
        let _guard = DrainGuard(&self.draining);

        self.drain().await
    }

    async fn drain(&self) -> Result<(), MasterError> {
        while self.is_active() {
            let Some(envelope) = self.queue.pop_first().await? else {
                break;
            };

            debug!(
                message_id = %envelope.message_id,
                kind = envelope.command.kind(),
                "Processing master command"
            );

            if let Err(err) = self.handle_command(envelope.command).await {
                if err.is_critical() {
                    return Err(err);
                }
                warn!(
                    message_id = %envelope.message_id,
                    error = %err,
                    "Master command handling failed, continuing with next command"
                );
            }
        }
        Ok(())
    }

    async fn handle_command(&self, command: MasterCommand) -> Result<(), MasterError> {
        match command {
            MasterCommand::TaskSubmitted { task_id } => {
                self.handle_task_submitted(&task_id).await
            }
            MasterCommand::TaskCompleted {
                task_id,
                processor_id,
                finished_at,
                total_cpu_ms,
                is_processor_stopping,
            } => {
                debug!(task_id = %task_id, total_cpu_ms, "Task completed");
                self.finish_task(&task_id, TaskOutcome::Success, finished_at)
                    .await?;
                self.offer_next_tasks(&processor_id, is_processor_stopping)
                    .await
            }
            MasterCommand::TaskFailed {
                task_id,
                processor_id,
                finished_at,
                error,
                is_processor_stopping,
            } => {
                self.finish_task(&task_id, TaskOutcome::Failed { error }, finished_at)
                    .await?;
                self.offer_next_tasks(&processor_id, is_processor_stopping)
                    .await
            }
            MasterCommand::TaskCancelCompleted {
                task_id,
                processor_id,
                finished_at,
                is_processor_stopping,
            } => {
                self.finish_task(&task_id, TaskOutcome::Canceled, finished_at)
                    .await?;
                self.offer_next_tasks(&processor_id, is_processor_stopping)
                    .await
            }
            MasterCommand::ConfigurationChanged { processor_id } => {
                // Slot budget may have changed; re-run placement.
                self.offer_next_tasks(&processor_id, false).await
            }
            MasterCommand::TaskProcessorRegistered { processor_id } => {
                self.offer_next_tasks(&processor_id, false).await
            }
            other => {
                warn!(kind = other.kind(), "Ignoring unknown master command kind");
                Ok(())
            }
        }
    }

    /// Place a freshly submitted task: try each candidate processor in
    /// order until one confirms within the timeout. If all fail, clear the
    /// assignment and report a placement failure.
    async fn handle_task_submitted(&self, task_id: &TaskId) -> Result<(), MasterError> {
        let Some(task) = self.tasks.get_by_id(task_id).await? else {
            warn!(task_id = %task_id, "Submitted task not found, skipping");
            return Ok(());
        };
        if task.status != TaskStatus::Pending {
            debug!(
                task_id = %task_id,
                status = ?task.status,
                "Ignoring submission for non-pending task"
            );
            return Ok(());
        }

        let candidates = self.distributor.processors_for_task(&task).await?;
        if candidates.is_empty() {
            warn!(task_id = %task_id, "No eligible processor for task");
            return Ok(());
        }

        for candidate in &candidates {
            match self.assign_task_to_processor(task_id, &candidate.id).await {
                Ok(true) => {
                    info!(
                        task_id = %task_id,
                        processor_id = %candidate.id,
                        "Task assigned"
                    );
                    return Ok(());
                }
                Ok(false) => continue,
                Err(err) if err.is_critical() => return Err(err),
                Err(err) => {
                    warn!(
                        task_id = %task_id,
                        processor_id = %candidate.id,
                        error = %err,
                        "Assignment attempt failed"
                    );
                }
            }
        }

        self.tasks.assign(task_id, None).await?;
        warn!(
            task_id = %task_id,
            attempted = candidates.len(),
            "No processor accepted task, assignment cleared"
        );
        Ok(())
    }

    /// Optimistic assignment with bounded confirmation wait.
    ///
    /// The repository records the assignment before the processor is
    /// notified; the waiter is registered before the notification is
    /// dispatched so a fast confirmation cannot race past it. On timeout
    /// the waiter is removed but the assignment record is left in place
    /// for the caller to retry or for later lifecycle events to correct.
    pub async fn assign_task_to_processor(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
    ) -> Result<bool, MasterError> {
        self.tasks
            .assign(task_id, Some(processor_id.clone()))
            .await?;
        let confirmation = self.handshakes.register(task_id.clone());

        // Remove the waiter on drop, confirmed, timed out, or canceled.
        struct HandshakeGuard<'a> {
            table: &'a AssignmentHandshakes,
            task_id: &'a TaskId,
        }
        impl Drop for HandshakeGuard<'_> {
            fn drop(&mut self) {
                self.table.remove(self.task_id);
            }
        }
        let _guard = HandshakeGuard {
            table: &self.handshakes,
            task_id,
        };

        // Dispatch the notification on a detached task so a confirmation
        // path that re-enters this node cannot deadlock the drain.
        let bus = Arc::clone(&self.task_bus);
        let notify_task = task_id.clone();
        let notify_processor = processor_id.clone();
        tokio::spawn(async move {
            if let Err(err) = bus
                .notify_task_assigned(&notify_task, &notify_processor)
                .await
            {
                warn!(
                    task_id = %notify_task,
                    processor_id = %notify_processor,
                    error = %err,
                    "Failed to publish assignment notification"
                );
            }
        });

        let confirmed = matches!(
            tokio::time::timeout(self.config.assign_task_timeout, confirmation).await,
            Ok(Ok(_))
        );

        if !confirmed {
            warn!(
                task_id = %task_id,
                processor_id = %processor_id,
                timeout_ms = self.config.assign_task_timeout.as_millis() as u64,
                "Processor did not confirm assignment in time"
            );
        }
        Ok(confirmed)
    }

    /// Confirmation path: a processor reported the task started. Releases
    /// the matching handshake waiter and drives Pending -> InProgress.
    async fn on_assigned_task_started(
        &self,
        task_id: &TaskId,
        processor_id: &ProcessorId,
        at: DateTime<Utc>,
    ) {
        match self.tasks.start(task_id, at).await {
            Ok(()) => {
                debug!(task_id = %task_id, processor_id = %processor_id, "Task started");
            }
            Err(MasterError::Core(CoreError::TaskNotFound(_))) => {
                warn!(task_id = %task_id, "Start reported for unknown task");
            }
            Err(MasterError::Core(CoreError::InvalidStateTransition { .. })) => {
                // Redelivered start notification; the bus is at-least-once.
                debug!(task_id = %task_id, "Duplicate start notification");
            }
            Err(err) => {
                warn!(task_id = %task_id, error = %err, "Failed to record task start");
            }
        }
        self.handshakes.complete(task_id, processor_id.clone());
    }

    /// Apply a terminal transition reported by a processor.
    async fn finish_task(
        &self,
        task_id: &TaskId,
        outcome: TaskOutcome,
        at: DateTime<Utc>,
    ) -> Result<(), MasterError> {
        let result = match &outcome {
            TaskOutcome::Success => self.tasks.complete(task_id, at).await,
            TaskOutcome::Failed { error } => self.tasks.fail(task_id, at, error).await,
            TaskOutcome::Canceled => self.tasks.cancel(task_id, at).await,
        };

        match result {
            Ok(()) => Ok(()),
            Err(MasterError::Core(CoreError::TaskNotFound(_))) => {
                warn!(
                    task_id = %task_id,
                    outcome = outcome.name(),
                    "Terminal report for unknown task"
                );
                Ok(())
            }
            Err(MasterError::Core(CoreError::InvalidStateTransition { .. })) => {
                // Redelivered terminal report; first writer wins.
                debug!(
                    task_id = %task_id,
                    outcome = outcome.name(),
                    "Task already terminal"
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// A processor freed capacity (or appeared, or was reconfigured):
    /// offer it the next eligible tasks.
    async fn offer_next_tasks(
        &self,
        processor_id: &ProcessorId,
        is_processor_stopping: bool,
    ) -> Result<(), MasterError> {
        if is_processor_stopping {
            debug!(processor_id = %processor_id, "Processor stopping, not offering tasks");
            return Ok(());
        }
        match self.registry.get_by_id(processor_id).await? {
            Some(processor) if processor.state.can_accept_tasks() => {}
            Some(processor) => {
                debug!(
                    processor_id = %processor_id,
                    state = ?processor.state,
                    "Processor not accepting tasks"
                );
                return Ok(());
            }
            None => {
                warn!(processor_id = %processor_id, "Processor not found, skipping offer");
                return Ok(());
            }
        }

        let next = self.distributor.next_tasks_for_processor(processor_id).await?;
        for task in next {
            match self.assign_task_to_processor(&task.id, processor_id).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        task_id = %task.id,
                        processor_id = %processor_id,
                        "Processor did not accept offered task"
                    );
                }
                Err(err) if err.is_critical() => return Err(err),
                Err(err) => {
                    warn!(
                        task_id = %task.id,
                        processor_id = %processor_id,
                        error = %err,
                        "Failed to offer task"
                    );
                }
            }
        }
        Ok(())
    }
}

impl Drop for MasterCommandsProcessor {
    fn drop(&mut self) {
        if let Some(listeners) = self
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .take()
        {
            listeners.started.abort();
            listeners.commands.abort();
        }
    }
}
