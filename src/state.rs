use std::sync::Arc;

use crate::services::job_scheduler_service::JobSchedulerService;

#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<JobSchedulerService>,
}
