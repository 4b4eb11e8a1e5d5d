//! Worker protocol handlers.
//!
//! These endpoints never surface internal errors: a failed claim or
//! update turns into a plain status code and a log line.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::models::{Job, JobError, JobLink, WorkItemUpdate};
use crate::repository::{jobs, work_items};
use crate::services;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct GetWorkParams {
    #[serde(rename = "serviceID")]
    pub service_id: String,
    #[serde(rename = "podName", default)]
    pub pod_name: Option<String>,
}

/// `GET /work?serviceID=…&podName=…` — claim the next work item.
pub async fn get_work(
    State(state): State<AppState>,
    Query(params): Query<GetWorkParams>,
) -> Response {
    match services::get_work(&state.db, &state.settings, &params.service_id).await {
        Ok(Some(handle)) => {
            debug!(
                service_id = %params.service_id,
                pod_name = params.pod_name.as_deref().unwrap_or("-"),
                work_item_id = handle.work_item.id,
                "work item dispatched"
            );
            (StatusCode::OK, Json(handle)).into_response()
        }
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(service_id = %params.service_id, "failed to claim work: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `PUT /work/:id` — accept a worker's terminal report.
///
/// Responds 204 once the update is queued; processing is asynchronous.
/// 409 when the owning job is already terminal, 503 when the queue is
/// saturated and the worker should retry.
pub async fn update_work(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(update): Json<WorkItemUpdate>,
) -> StatusCode {
    match owning_job_terminal(&state, id).await {
        Ok(Some(true)) => return StatusCode::CONFLICT,
        Ok(Some(false)) => {}
        // An unknown item is absorbed; the handler logs and drops it too.
        Ok(None) => {}
        Err(e) => {
            error!(work_item_id = id, "failed to check update target: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    }

    if state.updates.try_enqueue(id, update) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn owning_job_terminal(state: &AppState, id: i32) -> anyhow::Result<Option<bool>> {
    let mut conn = state.db.conn().await?;
    let Some(item) = work_items::get(&mut conn, id).await? else {
        return Ok(None);
    };
    let Some(job) = jobs::get(&mut conn, &item.job_id).await? else {
        return Ok(None);
    };
    Ok(Some(job.status.is_terminal()))
}

/// Job status document for observability.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDoc {
    #[serde(flatten)]
    pub job: Job,
    pub links: Vec<JobLink>,
    pub errors: Vec<JobError>,
}

/// `GET /jobs/:job_id` — current status, result links, and errors.
pub async fn get_job(State(state): State<AppState>, Path(job_id): Path<String>) -> Response {
    let result: anyhow::Result<Option<JobDoc>> = async {
        let mut conn = state.db.conn().await?;
        let Some(job) = jobs::get(&mut conn, &job_id).await? else {
            return Ok(None);
        };
        let links = jobs::links(&mut conn, &job_id).await?;
        let errors = jobs::errors(&mut conn, &job_id).await?;
        Ok(Some(JobDoc { job, links, errors }))
    }
    .await;

    match result {
        Ok(Some(doc)) => (StatusCode::OK, Json(doc)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(job_id = %job_id, "failed to load job: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// `GET /health` — 200 once the database answers.
pub async fn health(State(state): State<AppState>) -> StatusCode {
    match state.db.conn().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            error!("health check failed: {e}");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}
