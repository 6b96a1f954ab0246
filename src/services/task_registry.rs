use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::errors::AppError;
use crate::models::{JobParams, JobType, TaskId, TaskRecord, TaskStatus, TaskUpdate};
use crate::services::status_broadcaster::EventPublisher;

/// In-memory source of truth for task existence and state.
///
/// Mutations of one record go through `DashMap::get_mut`, which holds the
/// shard write lock for the whole read-modify-publish step, so concurrent
/// progress reports on the same id are linearized and their events are
/// published in mutation order.
pub struct TaskRegistry {
    tasks: DashMap<TaskId, TaskRecord>,
    last_completed: DashMap<JobType, TaskRecord>,
    events: EventPublisher,
    retention: usize,
}

impl TaskRegistry {
    pub fn new(events: EventPublisher, retention: usize) -> Self {
        Self {
            tasks: DashMap::new(),
            last_completed: DashMap::new(),
            events,
            retention: retention.max(1),
        }
    }

    /// Registers a new `pending` record
    pub fn create(&self, job_type: JobType, params: JobParams) -> TaskRecord {
        let record = TaskRecord::new(job_type, params);
        self.tasks.insert(record.id, record.clone());
        self.events.task(&record);
        debug!("Created {} task {}", job_type, record.id);

        self.evict_over_retention();
        record
    }

    pub fn get(&self, id: TaskId) -> Result<TaskRecord, AppError> {
        self.tasks
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(AppError::NotFound)
    }

    /// Applies `update` atomically.
    ///
    /// Returns `Ok(None)` when the record is already terminal: the late
    /// effect (e.g. cancellation racing completion) is discarded.
    pub fn update(&self, id: TaskId, update: TaskUpdate) -> Result<Option<TaskRecord>, AppError> {
        let mut entry = self.tasks.get_mut(&id).ok_or(AppError::NotFound)?;

        if entry.is_terminal() {
            debug!("Ignoring late update for terminal task {} ({})", id, entry.status);
            return Ok(None);
        }

        apply_update(entry.value_mut(), update);
        let snapshot = entry.value().clone();

        if snapshot.status == TaskStatus::Completed {
            self.last_completed.insert(snapshot.job_type, snapshot.clone());
        }
        self.events.task(&snapshot);

        Ok(Some(snapshot))
    }

    /// Most recently created record of `job_type`, whatever its state
    pub fn latest(&self, job_type: JobType) -> Option<TaskRecord> {
        self.tasks
            .iter()
            .filter(|entry| entry.job_type == job_type)
            .max_by_key(|entry| entry.created_at)
            .map(|entry| entry.value().clone())
    }

    /// Most recently completed record of `job_type`; survives eviction
    pub fn latest_completed(&self, job_type: JobType) -> Option<TaskRecord> {
        self.last_completed.get(&job_type).map(|entry| entry.value().clone())
    }

    /// All records, newest first
    pub fn list(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.tasks.iter().map(|entry| entry.value().clone()).collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    pub fn events(&self) -> &EventPublisher {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    fn evict_over_retention(&self) {
        let excess = self.tasks.len().saturating_sub(self.retention);
        if excess == 0 {
            return;
        }

        // Collect first: removing while iterating would deadlock on the shard lock.
        let mut terminal: Vec<_> = self
            .tasks
            .iter()
            .filter(|entry| entry.is_terminal())
            .map(|entry| (entry.completed_at.unwrap_or(entry.created_at), entry.id))
            .collect();
        terminal.sort();

        let evicted = terminal.into_iter().take(excess).map(|(_, id)| id).collect::<Vec<_>>();
        for id in &evicted {
            self.tasks.remove(id);
        }

        if !evicted.is_empty() {
            info!("Evicted {} finished tasks (retention {})", evicted.len(), self.retention);
        }
    }
}

fn apply_update(record: &mut TaskRecord, update: TaskUpdate) {
    let now = Utc::now();

    if let Some(status) = update.status {
        match status {
            TaskStatus::Pending => {}
            TaskStatus::Running => {
                if record.status == TaskStatus::Pending {
                    record.status = TaskStatus::Running;
                    record.started_at = Some(now);
                }
            }
            terminal => {
                record.status = terminal;
                record.completed_at = Some(now);
            }
        }
    }

    if let Some(progress) = update.progress {
        if progress.is_finite() {
            let progress = progress.clamp(0.0, 1.0);
            if progress > record.progress {
                record.progress = progress;
            }
        }
    }

    if let Some(message) = update.message {
        record.message = message;
    }

    match record.status {
        TaskStatus::Completed => record.result = update.result.or(record.result.take()),
        TaskStatus::Failed | TaskStatus::Cancelled => record.error = update.error.or(record.error.take()),
        _ => {}
    }
}
