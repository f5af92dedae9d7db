//! Queue and task monitoring handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use tf_core::{Error, JobId};
use tf_db::{QueueStats, StatusFilter, TaskSummary};

use crate::context::AppContext;
use crate::error::AppError;

/// Query parameters for listing tasks.
#[derive(Debug, Deserialize)]
pub struct ListTasksParams {
    pub status: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

fn task_not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Task not found" }))).into_response()
}

/// GET /queue/status
pub async fn queue_status(State(ctx): State<AppContext>) -> Result<Json<QueueStats>, AppError> {
    Ok(Json(ctx.store.get_queue_stats()?))
}

/// GET /queue/tasks
pub async fn list_tasks(
    State(ctx): State<AppContext>,
    Query(params): Query<ListTasksParams>,
) -> Result<Json<Vec<TaskSummary>>, AppError> {
    let filter: StatusFilter = params.status.as_deref().unwrap_or("all").parse()?;
    if params.limit < 0 || params.offset < 0 {
        return Err(Error::Validation("limit and offset must not be negative".into()).into());
    }
    let tasks = ctx.store.get_tasks(filter, params.limit, params.offset)?;
    Ok(Json(tasks))
}

/// GET /queue/task/{id}
pub async fn get_task(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let Ok(id) = id.parse::<JobId>() else {
        return Ok(task_not_found());
    };
    match ctx.store.get_task_info(id)? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(task_not_found()),
    }
}

/// GET /queue/task/{id}/files
pub async fn get_task_files(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Response, AppError> {
    let Ok(id) = id.parse::<JobId>() else {
        return Ok(task_not_found());
    };
    match ctx.store.get_task_file_status(id)? {
        Some(files) => Ok(Json(files).into_response()),
        None => Ok(task_not_found()),
    }
}
