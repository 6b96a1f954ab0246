pub(crate) mod health;
pub(crate) mod jobs;
pub(crate) mod scheduler;
pub(crate) mod tasks;

use axum::response::sse::Event;
use serde::Serialize;

use crate::errors::AppError;
use crate::models::{JobType, TaskId};

fn parse_job_type(raw: &str) -> Result<JobType, AppError> {
    raw.parse::<JobType>().map_err(AppError::Validation)
}

fn parse_task_id(raw: &str) -> Result<TaskId, AppError> {
    raw.parse::<TaskId>()
        .map_err(|_| AppError::Validation(format!("invalid task id '{}'", raw)))
}

fn sse_event<T: Serialize>(value: T) -> Result<Event, axum::Error> {
    Event::default().json_data(value)
}
