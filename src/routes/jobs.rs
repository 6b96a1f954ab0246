use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;

use crate::errors::AppError;
use crate::models::{TaskId, TaskRecord, TaskStatus};
use crate::routes::parse_job_type;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:job_type/start", post(start_job))
        .route("/:job_type/latest-result", get(latest_result))
}

#[derive(Debug, Serialize)]
struct StartJobResponse {
    task_id: TaskId,
    status: TaskStatus,
    message: String,
}

/// POST /api/jobs/:job_type/start - Start an on-demand run.
///
/// The body is optional; missing fields take the job's defaults. A non-empty
/// body must be JSON.
async fn start_job(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<StartJobResponse>), AppError> {
    let job_type = parse_job_type(&job_type)?;
    info!("POST /api/jobs/{}/start", job_type);

    let params = parse_params(&headers, &body)?;
    let record = state.scheduler.start_job(job_type, params)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            task_id: record.id,
            status: record.status,
            message: record.message,
        }),
    ))
}

fn parse_params(headers: &HeaderMap, body: &[u8]) -> Result<Option<serde_json::Value>, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .map(|mime| mime.trim().eq_ignore_ascii_case("application/json"))
        .unwrap_or(false);
    if !is_json {
        return Err(AppError::Validation(
            "Job parameters must be sent with Content-Type: application/json".to_string(),
        ));
    }

    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| AppError::Validation(format!("Invalid job parameters: {}", e)))
}

/// GET /api/jobs/:job_type/latest-result - Latest completed run of a type
async fn latest_result(
    State(state): State<AppState>,
    Path(job_type): Path<String>,
) -> Result<Json<TaskRecord>, AppError> {
    let job_type = parse_job_type(&job_type)?;
    Ok(Json(state.scheduler.latest_result(job_type)?))
}
