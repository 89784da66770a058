//! Task distributor - the placement policy pairing tasks with processors.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use taskfleet_core::{
    CoreError, ProcessorId, TaskProcessorRuntimeInfo, TaskRuntimeInfo, TaskStatus,
};

use crate::error::MasterError;
use crate::repository::{ProcessorRegistry, TaskRuntimeRepository};

/// Placement policy contract.
#[async_trait]
pub trait TaskDistributor: Send + Sync {
    /// Candidate processors for a pending task, best first.
    ///
    /// The caller tries each in order until one accepts the assignment.
    async fn processors_for_task(
        &self,
        task: &TaskRuntimeInfo,
    ) -> Result<Vec<TaskProcessorRuntimeInfo>, MasterError>;

    /// Candidate tasks for a processor with free slots, most urgent first.
    ///
    /// Unknown processors yield an empty sequence.
    async fn next_tasks_for_processor(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<Vec<TaskRuntimeInfo>, MasterError>;
}

/// Cap-aware, load-balancing distributor.
///
/// Caps are advisory ceilings and never negative; a missing cap means
/// unlimited. All counts within one call come from a single snapshot of the
/// active task set, so the decision is self-consistent regardless of task
/// order.
pub struct BalancedDistributor {
    tasks: Arc<dyn TaskRuntimeRepository>,
    processors: Arc<dyn ProcessorRegistry>,
    /// Fleet-wide per-task-type caps, applied on top of per-processor caps.
    task_type_caps: HashMap<String, u32>,
}

impl BalancedDistributor {
    /// Create a distributor over the given repositories.
    pub fn new(
        tasks: Arc<dyn TaskRuntimeRepository>,
        processors: Arc<dyn ProcessorRegistry>,
    ) -> Self {
        Self {
            tasks,
            processors,
            task_type_caps: HashMap::new(),
        }
    }

    /// Builder method to cap one task type fleet-wide.
    pub fn with_task_type_cap(mut self, task_type: impl Into<String>, max: u32) -> Self {
        self.task_type_caps.insert(task_type.into(), max);
        self
    }

    fn active_on(active: &[TaskRuntimeInfo], processor_id: &ProcessorId) -> usize {
        active
            .iter()
            .filter(|t| t.assigned_processor.as_ref() == Some(processor_id))
            .count()
    }

    fn active_of_type_on(
        active: &[TaskRuntimeInfo],
        processor_id: &ProcessorId,
        task_type: &str,
    ) -> usize {
        active
            .iter()
            .filter(|t| {
                t.assigned_processor.as_ref() == Some(processor_id) && t.task_type == task_type
            })
            .count()
    }

    /// Remaining slots for one task type on one processor, from the
    /// snapshot. `None` means unbounded.
    fn type_slots(
        &self,
        processor: &TaskProcessorRuntimeInfo,
        active: &[TaskRuntimeInfo],
        task_type: &str,
    ) -> Option<i64> {
        let per_processor = processor
            .config
            .max_workers_for_type(task_type)
            .map(|max| {
                let used = Self::active_of_type_on(active, &processor.id, task_type) as i64;
                (max as i64 - used).max(0)
            });

        let fleet_wide = self.task_type_caps.get(task_type).map(|max| {
            let used = active.iter().filter(|t| t.task_type == task_type).count() as i64;
            (*max as i64 - used).max(0)
        });

        match (per_processor, fleet_wide) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        }
    }
}

#[async_trait]
impl TaskDistributor for BalancedDistributor {
    async fn processors_for_task(
        &self,
        task: &TaskRuntimeInfo,
    ) -> Result<Vec<TaskProcessorRuntimeInfo>, MasterError> {
        if task.status != TaskStatus::Pending {
            return Err(CoreError::InvalidInput(format!(
                "cannot place task {} with status {:?}",
                task.id, task.status
            ))
            .into());
        }

        let active = self.tasks.get_active().await?;
        let all = self.processors.get_all().await?;

        let mut candidates: Vec<(usize, TaskProcessorRuntimeInfo)> = Vec::new();
        for processor in all {
            if !processor.state.can_accept_tasks() {
                continue;
            }

            let load = Self::active_on(&active, &processor.id);
            if let Some(max) = processor.config.max_workers {
                if load >= max as usize {
                    continue;
                }
            }

            if let Some(max) = processor.config.max_workers_for_type(&task.task_type) {
                let used = Self::active_of_type_on(&active, &processor.id, &task.task_type);
                if used >= max as usize {
                    continue;
                }
            }

            candidates.push((load, processor));
        }

        // Fewest active tasks first; stable, so equal loads keep registry order.
        candidates.sort_by_key(|(load, _)| *load);

        debug!(
            task_id = %task.id,
            task_type = %task.task_type,
            candidates = candidates.len(),
            "Selected candidate processors for task"
        );

        Ok(candidates.into_iter().map(|(_, p)| p).collect())
    }

    async fn next_tasks_for_processor(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<Vec<TaskRuntimeInfo>, MasterError> {
        let Some(processor) = self.processors.get_by_id(processor_id).await? else {
            debug!(processor_id = %processor_id, "Unknown processor, no tasks to offer");
            return Ok(Vec::new());
        };

        let active = self.tasks.get_active().await?;

        // Global slot budget for the processor. None = unlimited.
        let mut remaining: Option<i64> = processor.config.max_workers.map(|max| {
            let used = Self::active_on(&active, processor_id) as i64;
            (max as i64 - used).max(0)
        });
        if remaining == Some(0) {
            return Ok(Vec::new());
        }

        let mut pending = self.tasks.get_pending().await?;
        // Polling-queue tasks are pulled by their lane, not push-assigned.
        pending.retain(|t| t.polling_queue.is_none());
        // Most urgent first; stable, so equal priorities keep arrival order.
        pending.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut type_slots: HashMap<String, Option<i64>> = HashMap::new();
        let mut chosen = Vec::new();

        for task in pending {
            let slots = type_slots
                .entry(task.task_type.clone())
                .or_insert_with(|| self.type_slots(&processor, &active, &task.task_type));

            match slots {
                Some(s) if *s <= 0 => continue,
                Some(s) => *s -= 1,
                None => {}
            }

            chosen.push(task);

            if let Some(r) = remaining.as_mut() {
                *r -= 1;
                // Stop once the budget is down to its last slot.
                if *r <= 1 {
                    break;
                }
            }
        }

        debug!(
            processor_id = %processor_id,
            offered = chosen.len(),
            "Selected next tasks for processor"
        );

        Ok(chosen)
    }
}

/// Cap-ignoring distributor: every active processor qualifies for every
/// task, and a processor is offered all pending tasks by priority. A
/// lighter-weight policy for fleets that do not configure caps.
pub struct SimpleDistributor {
    tasks: Arc<dyn TaskRuntimeRepository>,
    processors: Arc<dyn ProcessorRegistry>,
}

impl SimpleDistributor {
    /// Create a distributor over the given repositories.
    pub fn new(
        tasks: Arc<dyn TaskRuntimeRepository>,
        processors: Arc<dyn ProcessorRegistry>,
    ) -> Self {
        Self { tasks, processors }
    }
}

#[async_trait]
impl TaskDistributor for SimpleDistributor {
    async fn processors_for_task(
        &self,
        task: &TaskRuntimeInfo,
    ) -> Result<Vec<TaskProcessorRuntimeInfo>, MasterError> {
        if task.status != TaskStatus::Pending {
            return Err(CoreError::InvalidInput(format!(
                "cannot place task {} with status {:?}",
                task.id, task.status
            ))
            .into());
        }

        let all = self.processors.get_all().await?;
        Ok(all
            .into_iter()
            .filter(|p| p.state.can_accept_tasks())
            .collect())
    }

    async fn next_tasks_for_processor(
        &self,
        processor_id: &ProcessorId,
    ) -> Result<Vec<TaskRuntimeInfo>, MasterError> {
        if self.processors.get_by_id(processor_id).await?.is_none() {
            return Ok(Vec::new());
        }

        let mut pending = self.tasks.get_pending().await?;
        pending.retain(|t| t.polling_queue.is_none());
        pending.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskfleet_core::{TaskId, TaskPriority};

    use crate::memory::{InMemoryProcessorRegistry, InMemoryTaskStore};

    struct Fixture {
        tasks: Arc<InMemoryTaskStore>,
        processors: Arc<InMemoryProcessorRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tasks: Arc::new(InMemoryTaskStore::new()),
                processors: Arc::new(InMemoryProcessorRegistry::new()),
            }
        }

        fn balanced(&self) -> BalancedDistributor {
            BalancedDistributor::new(self.tasks.clone(), self.processors.clone())
        }

        async fn add_processor(&self, processor: TaskProcessorRuntimeInfo) {
            self.processors.add(processor).await.unwrap();
        }

        async fn add_pending(&self, id: &str, task_type: &str, priority: TaskPriority) {
            self.tasks
                .add(
                    TaskRuntimeInfo::new(task_type)
                        .with_id(TaskId::new(id))
                        .with_priority(priority),
                )
                .await
                .unwrap();
        }

        async fn add_in_progress(&self, id: &str, task_type: &str, processor: &ProcessorId) {
            self.add_pending(id, task_type, TaskPriority::Normal).await;
            self.tasks
                .assign(&TaskId::new(id), Some(processor.clone()))
                .await
                .unwrap();
            self.tasks.start(&TaskId::new(id), Utc::now()).await.unwrap();
        }
    }

    fn processor(id: &str) -> TaskProcessorRuntimeInfo {
        TaskProcessorRuntimeInfo::new(ProcessorId::new(id), format!("host-{id}"))
    }

    #[tokio::test]
    async fn test_candidates_ordered_by_load() {
        let fx = Fixture::new();
        fx.add_processor(processor("busy")).await;
        fx.add_processor(processor("idle")).await;
        fx.add_in_progress("t1", "report", &ProcessorId::new("busy"))
            .await;

        let task = TaskRuntimeInfo::new("report");
        let candidates = fx.balanced().processors_for_task(&task).await.unwrap();
        let ids: Vec<&str> = candidates.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["idle", "busy"]);
    }

    #[tokio::test]
    async fn test_full_processor_excluded_from_candidates() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1").with_max_workers(1)).await;
        fx.add_in_progress("t1", "report", &ProcessorId::new("p1"))
            .await;

        let task = TaskRuntimeInfo::new("report");
        let candidates = fx.balanced().processors_for_task(&task).await.unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_type_cap_excludes_processor_for_that_type_only() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1").with_task_type_cap("report", 1))
            .await;
        fx.add_in_progress("t1", "report", &ProcessorId::new("p1"))
            .await;

        let report = TaskRuntimeInfo::new("report");
        assert!(fx
            .balanced()
            .processors_for_task(&report)
            .await
            .unwrap()
            .is_empty());

        let export = TaskRuntimeInfo::new("export");
        assert_eq!(
            fx.balanced()
                .processors_for_task(&export)
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_stopping_processor_never_a_candidate() {
        let fx = Fixture::new();
        let mut stopping = processor("p1");
        stopping.state = taskfleet_core::ProcessorState::Stopping;
        fx.add_processor(stopping).await;

        let task = TaskRuntimeInfo::new("report");
        assert!(fx
            .balanced()
            .processors_for_task(&task)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_non_pending_task_rejected() {
        let fx = Fixture::new();
        let mut task = TaskRuntimeInfo::new("report");
        task.start(Utc::now()).unwrap();
        assert!(fx.balanced().processors_for_task(&task).await.is_err());
    }

    #[tokio::test]
    async fn test_priority_ordering_with_arrival_tiebreak() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1")).await;
        fx.add_pending("low", "report", TaskPriority::Low).await;
        fx.add_pending("vhigh", "report", TaskPriority::VeryHigh).await;
        fx.add_pending("normal-1", "report", TaskPriority::Normal).await;
        fx.add_pending("high", "report", TaskPriority::High).await;
        fx.add_pending("normal-2", "report", TaskPriority::Normal).await;

        let next = fx
            .balanced()
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        let ids: Vec<&str> = next.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["vhigh", "high", "normal-1", "normal-2", "low"]);
    }

    #[tokio::test]
    async fn test_unknown_processor_gets_no_tasks() {
        let fx = Fixture::new();
        fx.add_pending("t1", "report", TaskPriority::Normal).await;

        let next = fx
            .balanced()
            .next_tasks_for_processor(&ProcessorId::new("ghost"))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_slot_budget_never_exceeded() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1").with_max_workers(3)).await;
        fx.add_in_progress("running", "report", &ProcessorId::new("p1"))
            .await;
        for i in 0..5 {
            fx.add_pending(&format!("t{i}"), "report", TaskPriority::Normal)
                .await;
        }

        let next = fx
            .balanced()
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        // Budget is 3 - 1 = 2; the sequence stops while one slot remains.
        assert_eq!(next.len(), 1);
        assert!(next.len() <= 2);
    }

    #[tokio::test]
    async fn test_exhausted_budget_yields_nothing() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1").with_max_workers(1)).await;
        fx.add_in_progress("running", "report", &ProcessorId::new("p1"))
            .await;
        fx.add_pending("t1", "report", TaskPriority::Normal).await;

        let next = fx
            .balanced()
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_type_slots_skip_saturated_type() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1").with_task_type_cap("report", 1))
            .await;
        fx.add_in_progress("running", "report", &ProcessorId::new("p1"))
            .await;
        fx.add_pending("blocked", "report", TaskPriority::VeryHigh).await;
        fx.add_pending("runnable", "export", TaskPriority::Low).await;

        let next = fx
            .balanced()
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        let ids: Vec<&str> = next.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["runnable"]);
    }

    #[tokio::test]
    async fn test_fleet_wide_type_cap_applies() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1")).await;
        fx.add_processor(processor("p2")).await;
        fx.add_in_progress("running", "report", &ProcessorId::new("p2"))
            .await;
        fx.add_pending("t1", "report", TaskPriority::Normal).await;

        let distributor = fx.balanced().with_task_type_cap("report", 1);
        let next = distributor
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        assert!(next.is_empty());
    }

    #[tokio::test]
    async fn test_polling_queue_tasks_not_push_assigned() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1")).await;
        fx.tasks
            .add(
                TaskRuntimeInfo::new("report")
                    .with_id(TaskId::new("lane"))
                    .with_polling_queue("nightly"),
            )
            .await
            .unwrap();
        fx.add_pending("direct", "report", TaskPriority::Normal).await;

        let next = fx
            .balanced()
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        let ids: Vec<&str> = next.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["direct"]);
    }

    #[tokio::test]
    async fn test_simple_distributor_ignores_caps() {
        let fx = Fixture::new();
        fx.add_processor(processor("p1").with_max_workers(1)).await;
        fx.add_in_progress("running", "report", &ProcessorId::new("p1"))
            .await;
        fx.add_pending("low", "report", TaskPriority::Low).await;
        fx.add_pending("high", "report", TaskPriority::High).await;

        let distributor = SimpleDistributor::new(fx.tasks.clone(), fx.processors.clone());
        let next = distributor
            .next_tasks_for_processor(&ProcessorId::new("p1"))
            .await
            .unwrap();
        let ids: Vec<&str> = next.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["high", "low"]);

        let task = TaskRuntimeInfo::new("report");
        assert_eq!(
            distributor.processors_for_task(&task).await.unwrap().len(),
            1
        );
    }
}
