use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use tracing::info;

use crate::errors::AppError;
use crate::models::{StopOutcome, StopTarget, TaskRecord};
use crate::routes::{parse_task_id, sse_event};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/:id", get(get_task))
        .route("/:id/stop", post(stop_task))
        .route("/:id/stream", get(stream_task))
}

/// GET /api/tasks - All retained tasks, newest first
async fn list_tasks(State(state): State<AppState>) -> Json<Vec<TaskRecord>> {
    Json(state.scheduler.tasks())
}

async fn get_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<TaskRecord>, AppError> {
    let id = parse_task_id(&id)?;
    Ok(Json(state.scheduler.task(id)?))
}

async fn stop_task(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<StopOutcome>, AppError> {
    let id = parse_task_id(&id)?;
    info!("POST /api/tasks/{}/stop", id);
    Ok(Json(state.scheduler.stop_tasks(StopTarget::Task(id))?))
}

/// GET /api/tasks/:id/stream - Current record, then its updates until terminal
async fn stream_task(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, AppError> {
    let id = parse_task_id(&id)?;
    let updates = state.scheduler.subscribe_task(id)?;
    Ok(Sse::new(updates.map(sse_event)).keep_alive(KeepAlive::default()))
}
