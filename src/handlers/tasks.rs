//! Task trigger and status endpoints

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::services::scheduler::Job;
use crate::AppState;

/// `GET /tasks/rss/trigger`: kick off a collection run
pub async fn trigger_collection(State(state): State<AppState>) -> Result<Json<serde_json::Value>> {
    let task_id = state.scheduler.trigger_collect_all();
    Ok(Json(json!({
        "task_id": task_id,
        "status": "triggered",
    })))
}

/// `GET /tasks/status/{id}`
pub async fn task_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Job>> {
    let task_id = Uuid::parse_str(&id).map_err(|_| AppError::BadRequest {
        message: format!("invalid task id: {id}"),
    })?;

    state
        .scheduler
        .get_job(task_id)
        .await
        .map(Json)
        .ok_or_else(|| AppError::NotFound {
            resource: format!("task {task_id}"),
        })
}
