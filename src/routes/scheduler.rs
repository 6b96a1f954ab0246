use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::{SchedulerSlot, SchedulerSnapshot, StopOutcome, StopTarget};
use crate::routes::{parse_job_type, sse_event};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(snapshot))
        .route("/stream", get(stream))
        .route("/enabled", post(set_all_enabled))
        .route("/stop", post(stop_all))
        .route("/:job_type/enabled", post(set_enabled))
        .route("/:job_type/stop", post(stop_type))
}

#[derive(Debug, Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

/// GET /api/scheduler - Slots with their current and last tasks
async fn snapshot(State(state): State<AppState>) -> Json<SchedulerSnapshot> {
    Json(state.scheduler.snapshot())
}

/// GET /api/scheduler/stream - Snapshot, then every state change
async fn stream(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    info!("GET /api/scheduler/stream - subscriber connected");
    Sse::new(state.scheduler.subscribe().map(sse_event)).keep_alive(KeepAlive::default())
}

/// POST /api/scheduler/enabled - Toggle automatic runs of every type
async fn set_all_enabled(
    State(state): State<AppState>,
    Json(req): Json<EnabledRequest>,
) -> Result<Json<Vec<SchedulerSlot>>, AppError> {
    info!("POST /api/scheduler/enabled - enabled={}", req.enabled);
    Ok(Json(state.scheduler.set_enabled(None, req.enabled)?))
}

/// POST /api/scheduler/:job_type/enabled
async fn set_enabled(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Result<Json<SchedulerSlot>, AppError> {
    let job_type = parse_job_type(&job_type)?;
    info!("POST /api/scheduler/{}/enabled - enabled={}", job_type, req.enabled);

    let mut slots = state.scheduler.set_enabled(Some(job_type), req.enabled)?;
    slots.pop().map(Json).ok_or(AppError::NotFound)
}

/// POST /api/scheduler/stop - Stop every running task
async fn stop_all(State(state): State<AppState>) -> Result<Json<StopOutcome>, AppError> {
    info!("POST /api/scheduler/stop");
    Ok(Json(state.scheduler.stop_tasks(StopTarget::All)?))
}

/// POST /api/scheduler/:job_type/stop
async fn stop_type(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<Json<StopOutcome>, AppError> {
    let job_type = parse_job_type(&job_type)?;
    info!("POST /api/scheduler/{}/stop", job_type);
    Ok(Json(state.scheduler.stop_tasks(StopTarget::Type(job_type))?))
}
