use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::jobs::Job;
use crate::models::{JobParams, JobType, SchedulerSlot, TaskRecord};
use crate::services::status_broadcaster::EventPublisher;
use crate::services::task_registry::TaskRegistry;
use crate::services::task_runner::TaskRunner;

/// Enforces at most one pending/running task per job type.
///
/// Each type has its own lock; the occupancy check and the start happen
/// under it, so a timer trigger racing a manual start cannot both win.
pub struct SlotManager {
    slots: BTreeMap<JobType, Mutex<SchedulerSlot>>,
    registry: Arc<TaskRegistry>,
    runner: Arc<TaskRunner>,
    events: EventPublisher,
}

impl SlotManager {
    pub fn new(
        slots: Vec<SchedulerSlot>,
        registry: Arc<TaskRegistry>,
        runner: Arc<TaskRunner>,
        events: EventPublisher,
    ) -> Self {
        Self {
            slots: slots.into_iter().map(|s| (s.job_type, Mutex::new(s))).collect(),
            registry,
            runner,
            events,
        }
    }

    /// Starts a job unless one of the same type is still active.
    ///
    /// `job_factory` is only invoked when the slot is free. Requests against
    /// an occupied slot are rejected, never queued.
    pub fn try_start<F>(&self, job_type: JobType, params: JobParams, job_factory: F) -> Result<TaskRecord, AppError>
    where
        F: FnOnce() -> Result<Arc<dyn Job>, AppError>,
    {
        let mut slot = self.slot(job_type)?.lock();
        self.start_locked(&mut slot, params, job_factory)
    }

    /// Timer-driven start: if the slot is enabled and due, attempts a start
    /// and advances `next_run_at` whether or not the start succeeded.
    ///
    /// `Ok(None)` means nothing was due. `Err` means the trigger was due but
    /// skipped; the skipped run is not retried before the next instant.
    pub fn trigger_if_due<F>(
        &self,
        job_type: JobType,
        now: DateTime<Utc>,
        job_factory: F,
    ) -> Result<Option<TaskRecord>, AppError>
    where
        F: FnOnce() -> Result<Arc<dyn Job>, AppError>,
    {
        let mut slot = self.slot(job_type)?.lock();
        if !slot.is_due(now) {
            return Ok(None);
        }

        let outcome = self.start_locked(&mut slot, JobParams::default_for(job_type), job_factory);

        if outcome.is_ok() {
            slot.last_run_at = Some(now);
        }
        slot.next_run_at = slot.recurrence.and_then(|r| r.next_after(now));
        self.events.slot(&slot);

        outcome.map(Some)
    }

    /// Toggles automatic triggering. Does not touch an active task.
    ///
    /// Re-enabling schedules the next instant after `now`; runs missed while
    /// disabled are not backfilled.
    pub fn set_enabled(&self, job_type: JobType, enabled: bool, now: DateTime<Utc>) -> Result<SchedulerSlot, AppError> {
        let mut slot = self.slot(job_type)?.lock();
        if enabled && !slot.enabled {
            slot.next_run_at = slot.recurrence.and_then(|r| r.next_after(now));
        }
        slot.enabled = enabled;
        info!("Scheduled {} tasks {}", job_type, if enabled { "enabled" } else { "disabled" });

        self.events.slot(&slot);
        Ok(self.view(&slot))
    }

    /// The pending/running task occupying the slot, if any
    pub fn current_task(&self, job_type: JobType) -> Option<TaskRecord> {
        let slot = self.slots.get(&job_type)?.lock();
        self.occupant(&slot)
    }

    pub fn is_idle(&self, job_type: JobType) -> bool {
        self.current_task(job_type).is_none()
    }

    /// All slots; `current_task_id` is cleared once its task is terminal
    pub fn slots(&self) -> Vec<SchedulerSlot> {
        self.slots.values().map(|slot| self.view(&slot.lock())).collect()
    }

    pub fn get(&self, job_type: JobType) -> Result<SchedulerSlot, AppError> {
        Ok(self.view(&self.slot(job_type)?.lock()))
    }

    fn start_locked<F>(&self, slot: &mut SchedulerSlot, params: JobParams, job_factory: F) -> Result<TaskRecord, AppError>
    where
        F: FnOnce() -> Result<Arc<dyn Job>, AppError>,
    {
        if let Some(active) = self.occupant(slot) {
            debug!("{} slot occupied by task {} ({})", slot.job_type, active.id, active.status);
            return Err(AppError::AlreadyRunning { job_type: slot.job_type });
        }

        let job = job_factory()?;
        let record = self.runner.start(slot.job_type, params, job);
        slot.current_task_id = Some(record.id);
        self.events.slot(&self.view(slot));

        Ok(record)
    }

    fn occupant(&self, slot: &SchedulerSlot) -> Option<TaskRecord> {
        slot.current_task_id
            .and_then(|id| self.registry.get(id).ok())
            .filter(|record| record.status.is_active())
    }

    fn view(&self, slot: &SchedulerSlot) -> SchedulerSlot {
        let mut view = slot.clone();
        if self.occupant(slot).is_none() {
            view.current_task_id = None;
        }
        view
    }

    fn slot(&self, job_type: JobType) -> Result<&Mutex<SchedulerSlot>, AppError> {
        self.slots
            .get(&job_type)
            .ok_or_else(|| AppError::Validation(format!("no scheduler slot for {}", job_type)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::JobError;
    use crate::jobs::JobContext;
    use crate::models::{AnalysisReport, Recurrence, TaskResult, TaskStatus};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    struct Sleeper(Duration);

    #[async_trait]
    impl Job for Sleeper {
        async fn run(&self, _ctx: JobContext) -> Result<TaskResult, JobError> {
            tokio::time::sleep(self.0).await;
            Ok(TaskResult::Analysis(AnalysisReport { data: vec![], count: 0 }))
        }
    }

    fn manager(now: DateTime<Utc>) -> (Arc<TaskRegistry>, SlotManager) {
        let events = EventPublisher::new(256);
        let registry = Arc::new(TaskRegistry::new(events.clone(), 100));
        let runner = Arc::new(TaskRunner::new(registry.clone(), HashMap::new()));
        let slots = vec![SchedulerSlot::new(
            JobType::Analysis,
            Some(Recurrence::Every { seconds: 60 }),
            true,
            now,
        )];
        (registry.clone(), SlotManager::new(slots, registry, runner, events))
    }

    fn sleeper(ms: u64) -> impl FnOnce() -> Result<Arc<dyn Job>, AppError> {
        move || Ok(Arc::new(Sleeper(Duration::from_millis(ms))) as Arc<dyn Job>)
    }

    fn params() -> JobParams {
        JobParams::default_for(JobType::Analysis)
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (registry, slots) = manager(Utc::now());

        let first = slots.try_start(JobType::Analysis, params(), sleeper(200)).unwrap();
        let second = slots.try_start(JobType::Analysis, params(), sleeper(200));

        assert!(matches!(second, Err(AppError::AlreadyRunning { job_type: JobType::Analysis })));
        assert_eq!(registry.len(), 1);
        assert_eq!(slots.current_task(JobType::Analysis).unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_factory_not_called_when_occupied() {
        let (_registry, slots) = manager(Utc::now());
        slots.try_start(JobType::Analysis, params(), sleeper(200)).unwrap();

        let result = slots.try_start(JobType::Analysis, params(), || -> Result<Arc<dyn Job>, AppError> {
            panic!("factory must not run for an occupied slot")
        });
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_slot_frees_after_completion() {
        let (registry, slots) = manager(Utc::now());
        let first = slots.try_start(JobType::Analysis, params(), sleeper(10)).unwrap();

        for _ in 0..100 {
            if slots.is_idle(JobType::Analysis) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(registry.get(first.id).unwrap().status, TaskStatus::Completed);
        assert!(slots.get(JobType::Analysis).unwrap().current_task_id.is_none());
        assert!(slots.try_start(JobType::Analysis, params(), sleeper(10)).is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_single_winner() {
        let (registry, slots) = manager(Utc::now());
        let slots = Arc::new(slots);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let slots = slots.clone();
            handles.push(tokio::spawn(async move {
                slots.try_start(JobType::Analysis, params(), sleeper(300)).is_ok()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_if_due_advances_schedule() {
        let start = Utc::now();
        let (_registry, slots) = manager(start);

        assert!(slots.trigger_if_due(JobType::Analysis, start, sleeper(10)).unwrap().is_none());

        let due = start + chrono::Duration::seconds(61);
        let record = slots.trigger_if_due(JobType::Analysis, due, sleeper(300)).unwrap();
        assert!(record.is_some());

        let slot = slots.get(JobType::Analysis).unwrap();
        assert_eq!(slot.last_run_at, Some(due));
        assert_eq!(slot.next_run_at, Some(due + chrono::Duration::seconds(60)));
    }

    #[tokio::test]
    async fn test_trigger_skipped_when_occupied() {
        let start = Utc::now();
        let (registry, slots) = manager(start);
        slots.try_start(JobType::Analysis, params(), sleeper(300)).unwrap();

        let due = start + chrono::Duration::seconds(61);
        let outcome = slots.trigger_if_due(JobType::Analysis, due, sleeper(10));
        assert!(matches!(outcome, Err(AppError::AlreadyRunning { .. })));

        let slot = slots.get(JobType::Analysis).unwrap();
        assert_eq!(slot.last_run_at, None);
        assert_eq!(slot.next_run_at, Some(due + chrono::Duration::seconds(60)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_disable_and_reenable() {
        let start = Utc::now();
        let (_registry, slots) = manager(start);
        let running = slots.try_start(JobType::Analysis, params(), sleeper(300)).unwrap();

        let slot = slots.set_enabled(JobType::Analysis, false, start).unwrap();
        assert!(!slot.enabled);
        assert_eq!(slot.current_task_id, Some(running.id));

        let late = start + chrono::Duration::seconds(600);
        assert!(slots.trigger_if_due(JobType::Analysis, late, sleeper(10)).unwrap().is_none());

        let slot = slots.set_enabled(JobType::Analysis, true, late).unwrap();
        assert_eq!(slot.next_run_at, Some(late + chrono::Duration::seconds(60)));
    }
}
