use chrono::{DateTime, Utc};
use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SchedulerConfig;
use crate::errors::AppError;
use crate::jobs::JobCatalog;
use crate::models::{
    JobParams, JobType, SchedulerEvent, SchedulerSlot, SchedulerSnapshot, StopOutcome, StopTarget, TaskId,
    TaskRecord,
};
use crate::services::slot_manager::SlotManager;
use crate::services::status_broadcaster::{EventPublisher, StatusBroadcaster};
use crate::services::stop_controller::StopController;
use crate::services::task_registry::TaskRegistry;
use crate::services::task_runner::TaskRunner;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The one scheduler instance of the process.
///
/// Built once in `main`, shared with the handlers through `AppState`. The
/// timer only calls [`JobSchedulerService::tick`]; everything it does is
/// also reachable from the API.
pub struct JobSchedulerService {
    registry: Arc<TaskRegistry>,
    slots: Arc<SlotManager>,
    broadcaster: StatusBroadcaster,
    stop_controller: StopController,
    catalog: JobCatalog,
    tick_interval: Duration,
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    scheduler: Mutex<Option<JobScheduler>>,
}

impl JobSchedulerService {
    pub fn new(config: &SchedulerConfig, catalog: JobCatalog) -> Self {
        let now = Utc::now();
        let events = EventPublisher::new(config.event_capacity);
        let registry = Arc::new(TaskRegistry::new(events.clone(), config.retention));
        let runner = Arc::new(TaskRunner::new(registry.clone(), config.max_runtime.clone()));

        let slots = JobType::ALL
            .iter()
            .map(|job_type| SchedulerSlot::new(*job_type, config.recurrence(*job_type), config.enabled, now))
            .collect();
        let slots = Arc::new(SlotManager::new(slots, registry.clone(), runner.clone(), events.clone()));

        let running = Arc::new(AtomicBool::new(false));
        let shutdown = CancellationToken::new();
        let broadcaster = StatusBroadcaster::new(
            registry.clone(),
            slots.clone(),
            events,
            running.clone(),
            shutdown.clone(),
        );
        let stop_controller = StopController::new(registry.clone(), slots.clone(), runner);

        for job_type in JobType::ALL {
            match config.recurrence(job_type) {
                Some(rule) if catalog.contains(job_type) => info!("📅 Scheduled: {} [{}]", job_type, rule),
                Some(_) => warn!("⚠️  {} has a schedule but no job is configured; triggers will be skipped", job_type),
                None => info!("📅 {} runs on demand only", job_type),
            }
        }

        Self {
            registry,
            slots,
            broadcaster,
            stop_controller,
            catalog,
            tick_interval: config.tick_interval,
            running,
            shutdown,
            scheduler: Mutex::new(None),
        }
    }

    /// Registers the periodic tick and starts the timer
    pub async fn start(self: &Arc<Self>) -> Result<(), AppError> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            debug!("Job scheduler already started");
            return Ok(());
        }

        info!("🚀 Starting job scheduler (tick every {}s)...", self.tick_interval.as_secs());

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        // The timer must not keep the service alive on its own.
        let service = Arc::downgrade(self);
        let tick_job = CronJob::new_repeated_async(self.tick_interval, move |_uuid, _l| {
            let service = service.clone();
            Box::pin(async move {
                if let Some(service) = service.upgrade() {
                    service.tick(Utc::now());
                }
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create scheduler tick: {}", e)))?;

        scheduler
            .add(tick_job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add scheduler tick: {}", e)))?;
        scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        self.running.store(true, Ordering::SeqCst);
        *guard = Some(scheduler);
        info!("✅ Job scheduler started");
        Ok(())
    }

    /// Stops the timer and closes every subscriber stream. Tasks already
    /// running are left alone.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.shutdown.cancel();

        let mut guard = self.scheduler.lock().await;
        let Some(mut scheduler) = guard.take() else {
            return Ok(());
        };

        info!("🛑 Stopping job scheduler...");
        self.running.store(false, Ordering::SeqCst);
        scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        info!("✅ Job scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits until no task is pending or running, up to `timeout`.
    /// Returns whether every task reached a terminal state in time.
    pub async fn wait_until_idle(&self, timeout: Duration) -> bool {
        let idle = async {
            loop {
                if !self.registry.list().iter().any(|record| record.status.is_active()) {
                    return;
                }
                tokio::time::sleep(IDLE_POLL_INTERVAL).await;
            }
        };

        match tokio::time::timeout(timeout, idle).await {
            Ok(()) => true,
            Err(_) => {
                let active = self.registry.list().into_iter().filter(|r| r.status.is_active()).count();
                warn!("⏱️ {} task(s) still active after {}s", active, timeout.as_secs());
                false
            }
        }
    }

    /// One pass over every job type; returns the tasks it started.
    ///
    /// Each type is evaluated independently: a failure to start one type is
    /// logged and does not keep the others from being checked.
    pub fn tick(&self, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let mut started = Vec::new();

        for job_type in JobType::ALL {
            if !self.catalog.contains(job_type) {
                continue;
            }

            match self.slots.trigger_if_due(job_type, now, || self.catalog.get(job_type)) {
                Ok(Some(record)) => {
                    info!("⏰ Scheduled {} run started task {}", job_type, record.id);
                    started.push(record);
                }
                Ok(None) => {}
                Err(AppError::AlreadyRunning { .. }) => {
                    warn!("⏭️  Skipping scheduled {} run: previous task still active", job_type);
                }
                Err(e) => {
                    error!("❌ Scheduled {} run failed to start: {}", job_type, e);
                }
            }
        }

        started
    }

    /// On-demand start with optional request parameters
    pub fn start_job(&self, job_type: JobType, params: Option<serde_json::Value>) -> Result<TaskRecord, AppError> {
        let params = JobParams::from_request(job_type, params)?;
        let record = self
            .slots
            .try_start(job_type, params, || self.catalog.get(job_type))?;
        info!("🚀 Manual {} run started task {}", job_type, record.id);
        Ok(record)
    }

    pub fn stop_tasks(&self, target: StopTarget) -> Result<StopOutcome, AppError> {
        self.stop_controller.stop(target)
    }

    /// Toggles one type, or every type when `job_type` is `None`
    pub fn set_enabled(&self, job_type: Option<JobType>, enabled: bool) -> Result<Vec<SchedulerSlot>, AppError> {
        let now = Utc::now();
        match job_type {
            Some(job_type) => Ok(vec![self.slots.set_enabled(job_type, enabled, now)?]),
            None => JobType::ALL
                .iter()
                .map(|job_type| self.slots.set_enabled(*job_type, enabled, now))
                .collect(),
        }
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        self.broadcaster.snapshot()
    }

    pub fn subscribe(&self) -> impl Stream<Item = SchedulerEvent> + Send + 'static {
        self.broadcaster.subscribe()
    }

    pub fn subscribe_task(&self, id: TaskId) -> Result<impl Stream<Item = TaskRecord> + Send + 'static, AppError> {
        self.broadcaster.subscribe_task(id)
    }

    pub fn task(&self, id: TaskId) -> Result<TaskRecord, AppError> {
        self.registry.get(id)
    }

    pub fn tasks(&self) -> Vec<TaskRecord> {
        self.registry.list()
    }

    /// Latest completed record of `job_type`, regardless of what the slot
    /// is doing now
    pub fn latest_result(&self, job_type: JobType) -> Result<TaskRecord, AppError> {
        self.registry.latest_completed(job_type).ok_or(AppError::NotFound)
    }
}
