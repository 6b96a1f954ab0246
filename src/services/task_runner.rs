use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::errors::JobError;
use crate::jobs::{Job, JobContext, ProgressReporter};
use crate::models::{JobParams, JobType, TaskId, TaskRecord, TaskUpdate};
use crate::services::task_registry::TaskRegistry;

pub const DEFAULT_MAX_RUNTIME: Duration = Duration::from_secs(3600);

/// Launches jobs and drives their records to a terminal state.
pub struct TaskRunner {
    registry: Arc<TaskRegistry>,
    cancellations: Arc<DashMap<TaskId, CancellationToken>>,
    max_runtime: HashMap<JobType, Duration>,
}

impl TaskRunner {
    pub fn new(registry: Arc<TaskRegistry>, max_runtime: HashMap<JobType, Duration>) -> Self {
        Self {
            registry,
            cancellations: Arc::new(DashMap::new()),
            max_runtime,
        }
    }

    pub fn max_runtime(&self, job_type: JobType) -> Duration {
        self.max_runtime.get(&job_type).copied().unwrap_or(DEFAULT_MAX_RUNTIME)
    }

    /// Creates a `pending` record and spawns the job; never blocks on it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, job_type: JobType, params: JobParams, job: Arc<dyn Job>) -> TaskRecord {
        let record = self.registry.create(job_type, params.clone());
        let cancel = CancellationToken::new();
        self.cancellations.insert(record.id, cancel.clone());

        tokio::spawn(supervise(
            self.registry.clone(),
            self.cancellations.clone(),
            record.id,
            job_type,
            params,
            job,
            cancel,
            self.max_runtime(job_type),
        ));

        record
    }

    /// Sets the cancellation flag of a live task. Returns false if the task
    /// is unknown or already finished.
    pub fn cancel(&self, id: TaskId) -> bool {
        match self.cancellations.get(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn supervise(
    registry: Arc<TaskRegistry>,
    cancellations: Arc<DashMap<TaskId, CancellationToken>>,
    id: TaskId,
    job_type: JobType,
    params: JobParams,
    job: Arc<dyn Job>,
    cancel: CancellationToken,
    max_runtime: Duration,
) {
    info!("🏃 Starting {} task {}", job_type, id);
    let _ = registry.update(id, TaskUpdate::running(format!("{} task started", job_type)));

    let ctx = JobContext::new(id, params, ProgressReporter::new(registry.clone(), id), cancel.clone());
    let mut handle = tokio::spawn(async move { job.run(ctx).await });

    let update = match tokio::time::timeout(max_runtime, &mut handle).await {
        Ok(Ok(Ok(result))) => {
            info!("✅ {} task {} completed: {}", job_type, id, result.summary_line());
            TaskUpdate::completed(result)
        }
        Ok(Ok(Err(JobError::Cancelled))) => {
            info!("🛑 {} task {} cancelled", job_type, id);
            TaskUpdate::cancelled(Some("stopped by request".to_string()))
        }
        Ok(Ok(Err(e))) => {
            error!("❌ {} task {} failed: {}", job_type, id, e);
            TaskUpdate::failed(e.to_string())
        }
        Ok(Err(join_error)) => {
            error!("❌ {} task {} panicked: {}", job_type, id, join_error);
            TaskUpdate::failed(if join_error.is_panic() { "job panicked" } else { "job aborted" })
        }
        Err(_) => {
            // Abandon the job: abort takes effect at its next await point, if any.
            handle.abort();
            let stop_requested = cancel.is_cancelled();
            cancel.cancel();
            let timeout = JobError::Timeout(max_runtime);
            warn!("⏱️ {} task {} {}", job_type, id, timeout);
            if stop_requested {
                TaskUpdate::cancelled(Some(format!("{} after cancellation was requested", timeout)))
            } else {
                TaskUpdate::failed(timeout.to_string())
            }
        }
    };

    let _ = registry.update(id, update);
    cancellations.remove(&id);
}
