use std::sync::Arc;
use tracing::info;

use crate::errors::AppError;
use crate::models::{JobType, StopOutcome, StopTarget, TaskRecord, TaskStatus, TaskUpdate};
use crate::services::slot_manager::SlotManager;
use crate::services::task_registry::TaskRegistry;
use crate::services::task_runner::TaskRunner;

pub const STOP_REQUESTED_MESSAGE: &str = "Stop requested, cleaning up...";

/// Resolves stop requests to running tasks and signals their cancellation flag.
/// The transition to `cancelled` happens later, when the job observes the flag
/// or the watchdog fires.
pub struct StopController {
    registry: Arc<TaskRegistry>,
    slots: Arc<SlotManager>,
    runner: Arc<TaskRunner>,
}

impl StopController {
    pub fn new(registry: Arc<TaskRegistry>, slots: Arc<SlotManager>, runner: Arc<TaskRunner>) -> Self {
        Self {
            registry,
            slots,
            runner,
        }
    }

    /// `NotFound` only for an unknown explicit task id; idle slots and
    /// finished tasks report `NothingToStop`.
    pub fn stop(&self, target: StopTarget) -> Result<StopOutcome, AppError> {
        let candidates: Vec<TaskRecord> = match target {
            StopTarget::Type(job_type) => self.slots.current_task(job_type).into_iter().collect(),
            StopTarget::Task(id) => vec![self.registry.get(id)?],
            StopTarget::All => JobType::ALL
                .iter()
                .filter_map(|job_type| self.slots.current_task(*job_type))
                .collect(),
        };

        let mut task_ids = Vec::new();
        for record in candidates {
            if record.status != TaskStatus::Running {
                continue;
            }
            // The token outlives the active states, so a missing token means
            // the task is already terminal and the message update was a no-op.
            let _ = self.registry.update(record.id, TaskUpdate::message(STOP_REQUESTED_MESSAGE));
            if self.runner.cancel(record.id) {
                info!("Requested stop for {} task {}", record.job_type, record.id);
                task_ids.push(record.id);
            }
        }

        if task_ids.is_empty() {
            info!("Nothing to stop for {:?}", target);
            Ok(StopOutcome::NothingToStop)
        } else {
            Ok(StopOutcome::Stopping { task_ids })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::JobError;
    use crate::jobs::{Job, JobContext};
    use crate::models::{AnalysisReport, JobParams, SchedulerSlot, TaskResult};
    use crate::services::status_broadcaster::EventPublisher;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    struct UntilCancelled;

    #[async_trait]
    impl Job for UntilCancelled {
        async fn run(&self, ctx: JobContext) -> Result<TaskResult, JobError> {
            ctx.checkpoint(0.1, "waiting")?;
            ctx.cancelled().await;
            Err(JobError::Cancelled)
        }
    }

    struct Quick;

    #[async_trait]
    impl Job for Quick {
        async fn run(&self, _ctx: JobContext) -> Result<TaskResult, JobError> {
            Ok(TaskResult::Analysis(AnalysisReport { data: vec![], count: 0 }))
        }
    }

    fn controller() -> (Arc<TaskRegistry>, Arc<SlotManager>, StopController) {
        let events = EventPublisher::new(256);
        let registry = Arc::new(TaskRegistry::new(events.clone(), 100));
        let runner = Arc::new(TaskRunner::new(registry.clone(), HashMap::new()));
        let slots = JobType::ALL
            .iter()
            .map(|t| SchedulerSlot::new(*t, None, true, Utc::now()))
            .collect();
        let slots = Arc::new(SlotManager::new(slots, registry.clone(), runner.clone(), events));
        let controller = StopController::new(registry.clone(), slots.clone(), runner);
        (registry, slots, controller)
    }

    async fn wait_for(registry: &TaskRegistry, id: crate::models::TaskId, status: TaskStatus) {
        for _ in 0..200 {
            if registry.get(id).unwrap().status == status {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("task {} never reached {}", id, status);
    }

    fn start(slots: &SlotManager, job_type: JobType, job: Arc<dyn Job>) -> TaskRecord {
        slots
            .try_start(job_type, JobParams::default_for(job_type), move || Ok(job))
            .unwrap()
    }

    #[tokio::test]
    async fn test_stop_by_type() {
        let (registry, slots, controller) = controller();
        let record = start(&slots, JobType::Analysis, Arc::new(UntilCancelled));
        wait_for(&registry, record.id, TaskStatus::Running).await;

        let outcome = controller.stop(StopTarget::Type(JobType::Analysis)).unwrap();
        assert_eq!(outcome, StopOutcome::Stopping { task_ids: vec![record.id] });

        wait_for(&registry, record.id, TaskStatus::Cancelled).await;
        assert!(slots.is_idle(JobType::Analysis));
    }

    #[tokio::test]
    async fn test_stop_idle_slot_is_nothing_to_stop() {
        let (_registry, _slots, controller) = controller();
        assert_eq!(
            controller.stop(StopTarget::Type(JobType::SignalStrategy)).unwrap(),
            StopOutcome::NothingToStop
        );
        assert_eq!(controller.stop(StopTarget::All).unwrap(), StopOutcome::NothingToStop);
    }

    #[tokio::test]
    async fn test_stop_finished_task_leaves_it_unchanged() {
        let (registry, slots, controller) = controller();
        let record = start(&slots, JobType::Analysis, Arc::new(Quick));
        wait_for(&registry, record.id, TaskStatus::Completed).await;
        let before = registry.get(record.id).unwrap();

        assert_eq!(controller.stop(StopTarget::Task(record.id)).unwrap(), StopOutcome::NothingToStop);

        let after = registry.get(record.id).unwrap();
        assert_eq!(after.status, TaskStatus::Completed);
        assert_eq!(after.message, before.message);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_stop_pending_task_is_nothing_to_stop() {
        let (registry, slots, controller) = controller();
        // The supervisor cannot run before this test yields, so the task is still pending
        let record = start(&slots, JobType::Analysis, Arc::new(UntilCancelled));
        assert_eq!(registry.get(record.id).unwrap().status, TaskStatus::Pending);

        assert_eq!(controller.stop(StopTarget::Task(record.id)).unwrap(), StopOutcome::NothingToStop);
        assert_eq!(
            controller.stop(StopTarget::Type(JobType::Analysis)).unwrap(),
            StopOutcome::NothingToStop
        );

        let after = registry.get(record.id).unwrap();
        assert_eq!(after.status, TaskStatus::Pending);
        assert_eq!(after.message, record.message);

        // The request left no flag behind: the task runs normally
        wait_for(&registry, record.id, TaskStatus::Running).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.get(record.id).unwrap().status, TaskStatus::Running);

        controller.stop(StopTarget::Task(record.id)).unwrap();
        wait_for(&registry, record.id, TaskStatus::Cancelled).await;
    }

    #[tokio::test]
    async fn test_stop_unknown_task_is_not_found() {
        let (_registry, _slots, controller) = controller();
        assert!(matches!(
            controller.stop(StopTarget::Task(uuid::Uuid::new_v4())),
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_stop_all() {
        let (registry, slots, controller) = controller();
        let a = start(&slots, JobType::Analysis, Arc::new(UntilCancelled));
        let b = start(&slots, JobType::TimeframeReview, Arc::new(UntilCancelled));
        wait_for(&registry, a.id, TaskStatus::Running).await;
        wait_for(&registry, b.id, TaskStatus::Running).await;

        match controller.stop(StopTarget::All).unwrap() {
            StopOutcome::Stopping { task_ids } => {
                assert_eq!(task_ids.len(), 2);
                assert!(task_ids.contains(&a.id));
                assert!(task_ids.contains(&b.id));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }

        wait_for(&registry, a.id, TaskStatus::Cancelled).await;
        wait_for(&registry, b.id, TaskStatus::Cancelled).await;
    }

    #[tokio::test]
    async fn test_stop_sets_message_while_winding_down() {
        let (registry, slots, controller) = controller();
        let record = start(&slots, JobType::Analysis, Arc::new(UntilCancelled));
        wait_for(&registry, record.id, TaskStatus::Running).await;

        let mut rx = registry_events(&registry);
        controller.stop(StopTarget::Task(record.id)).unwrap();
        wait_for(&registry, record.id, TaskStatus::Cancelled).await;

        let mut saw_message = false;
        while let Ok(event) = rx.try_recv() {
            if let crate::models::SchedulerEvent::Task(r) = event {
                if r.message == STOP_REQUESTED_MESSAGE {
                    saw_message = true;
                }
            }
        }
        assert!(saw_message);
    }

    fn registry_events(registry: &TaskRegistry) -> tokio::sync::broadcast::Receiver<crate::models::SchedulerEvent> {
        registry.events().subscribe()
    }
}
