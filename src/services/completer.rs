//! Job completer: result links, progress, terminal status, and the
//! user-facing cancel/pause/resume actions.

use diesel_async::AsyncConnection;
use tracing::{debug, info};

use crate::artifacts::{read_catalog, read_item, resolve_href, ArtifactError, ArtifactStore};
use crate::models::{Job, JobLink, JobStatus, WorkItemUpdate, WorkflowStep};
use crate::repository::{jobs, steps, user_work, work_items, Db, SqliteConn};

use super::{OrchestrationError, Result};

/// Handle the tail of an update: record result links for leaf items,
/// advance the progress counters, and terminate or pause the job when the
/// pipeline has drained. Runs inside the update handler's transaction.
pub async fn on_item_complete(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    job: &Job,
    next_step: Option<&WorkflowStep>,
    update: &WorkItemUpdate,
    all_step_complete: bool,
) -> Result<()> {
    if next_step.is_none() && !update.is_failure() {
        add_result_links(conn, store, job, update).await?;
    }

    jobs::increment_batches_completed(conn, &job.id).await?;

    if job.status == JobStatus::Previewing {
        // User-gated preview: park the job instead of driving it further.
        info!(job_id = %job.id, "preview complete, pausing job");
        jobs::set_status(
            conn,
            &job.id,
            JobStatus::Paused,
            Some("preview ready; resume the job to continue processing"),
        )
        .await?;
        user_work::recompute_for_user(conn, &job.username).await?;
        return Ok(());
    }

    let next_count = match next_step {
        None => 0,
        Some(n) => steps::get(conn, &job.id, n.step_index)
            .await?
            .map(|s| s.work_item_count)
            .unwrap_or(0),
    };

    if all_step_complete && next_count == 0 {
        finalize(conn, job).await?;
    } else {
        update_progress(conn, &job.id).await?;
    }

    Ok(())
}

/// Append one data link per asset found in the item's result catalogs.
/// Duplicate worker updates land on the same hrefs and are absorbed.
async fn add_result_links(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    job: &Job,
    update: &WorkItemUpdate,
) -> Result<()> {
    for catalog_url in update.results() {
        let catalog = match read_catalog(store, catalog_url).await {
            Ok(catalog) => catalog,
            Err(ArtifactError::NotFound(url)) => {
                return Err(OrchestrationError::InvariantViolation(format!(
                    "job {}: result catalog missing from artifact store: {url}",
                    job.id
                )))
            }
            Err(e) => return Err(e.into()),
        };
        for href in catalog.item_hrefs() {
            let item_url = resolve_href(catalog_url, href);
            let stac_item = match read_item(store, &item_url).await {
                Ok(item) => item,
                Err(ArtifactError::NotFound(url)) => {
                    return Err(OrchestrationError::InvariantViolation(format!(
                        "job {}: result item missing from artifact store: {url}",
                        job.id
                    )))
                }
                Err(e) => return Err(e.into()),
            };
            for asset in stac_item.assets.values() {
                let link = JobLink {
                    href: asset.href.clone(),
                    rel: "data".to_string(),
                    mime_type: asset.media_type.clone(),
                    title: asset.title.clone(),
                    bbox: stac_item.bbox,
                    temporal_start: stac_item
                        .properties
                        .start_datetime
                        .as_deref()
                        .and_then(parse_temporal),
                    temporal_end: stac_item
                        .properties
                        .end_datetime
                        .as_deref()
                        .and_then(parse_temporal),
                };
                jobs::add_link(conn, &job.id, &link).await?;
            }
        }
    }
    Ok(())
}

fn parse_temporal(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .ok()
}

/// Compute and store the final status once the pipeline has drained.
async fn finalize(conn: &mut SqliteConn, job: &Job) -> Result<()> {
    let errors = jobs::error_count(conn, &job.id).await?;
    let links = jobs::link_count(conn, &job.id).await?;

    let (status, message) = if errors == 0 {
        (JobStatus::Successful, "the job has completed successfully")
    } else if links > 0 {
        (
            JobStatus::CompleteWithErrors,
            "the job has completed with errors; see the errors field for details",
        )
    } else {
        (
            JobStatus::Failed,
            "the job failed; every granule either failed or was skipped",
        )
    };

    jobs::set_status(conn, &job.id, status, Some(message)).await?;
    if status != JobStatus::Failed {
        jobs::set_progress(conn, &job.id, 100).await?;
    }

    let swept = work_items::cancel_open_for_job(conn, &job.id).await?;
    user_work::recompute_for_user(conn, &job.username).await?;
    info!(job_id = %job.id, %status, swept, "job terminated");
    Ok(())
}

/// Mark a job failed and sweep its outstanding work. Used by the failure
/// policy and the invariant-violation path.
pub(crate) async fn fail_job_in_tx(
    conn: &mut SqliteConn,
    job_id: &str,
    username: &str,
    message: &str,
) -> Result<()> {
    jobs::set_status(conn, job_id, JobStatus::Failed, Some(message)).await?;
    let swept = work_items::cancel_open_for_job(conn, job_id).await?;
    user_work::recompute_for_user(conn, username).await?;
    info!(job_id = %job_id, swept, "job failed: {message}");
    Ok(())
}

/// Recompute progress from the per-step completion fractions, weighted by
/// `progress_weight` and clamped below 100 while the job is live.
pub(crate) async fn update_progress(conn: &mut SqliteConn, job_id: &str) -> Result<()> {
    let all_steps = steps::for_job(conn, job_id).await?;
    if all_steps.is_empty() {
        return Ok(());
    }

    let total_weight: f64 = all_steps.iter().map(|s| s.progress_weight.max(0.0)).sum();
    let total_weight = if total_weight > 0.0 {
        total_weight
    } else {
        all_steps.len() as f64
    };

    let done: f64 = all_steps
        .iter()
        .map(|s| {
            let weight = if s.progress_weight > 0.0 {
                s.progress_weight
            } else {
                1.0
            };
            let expected = s.work_item_count.max(1) as f64;
            let frac = (s.completed_count as f64 / expected).min(1.0);
            weight * frac
        })
        .sum();

    let progress = ((done / total_weight) * 100.0).floor() as i32;
    let progress = progress.clamp(0, 99);
    jobs::set_progress(conn, job_id, progress).await?;
    debug!(job_id = %job_id, progress, "updated job progress");
    Ok(())
}

/// Cancel a job: the user or an admin pulls the plug. Outstanding ready
/// and running items are swept to `canceled`.
pub async fn cancel_job(db: &Db, job_id: &str, message: Option<&str>) -> Result<Job> {
    let job_id = job_id.to_string();
    let message = message.unwrap_or("canceled by user").to_string();

    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let job = jobs::get(conn, &job_id)
                .await?
                .ok_or_else(|| OrchestrationError::NotFound(format!("job {job_id}")))?;
            if job.status.is_terminal() {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "job {job_id} is already {}",
                    job.status
                )));
            }

            jobs::set_status(conn, &job_id, JobStatus::Canceled, Some(&message)).await?;
            jobs::set_progress(conn, &job_id, 100).await?;
            let swept = work_items::cancel_open_for_job(conn, &job_id).await?;
            user_work::recompute_for_user(conn, &job.username).await?;
            info!(job_id = %job_id, swept, "job canceled");

            Ok(jobs::get(conn, &job_id).await?.unwrap_or(job))
        })
    })
    .await
}

/// Pause a live job; its ready items stay put but stop being dispatched.
pub async fn pause_job(db: &Db, job_id: &str) -> Result<Job> {
    let job_id = job_id.to_string();

    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let job = jobs::get(conn, &job_id)
                .await?
                .ok_or_else(|| OrchestrationError::NotFound(format!("job {job_id}")))?;
            if job.status.is_terminal() {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "job {job_id} is already {}",
                    job.status
                )));
            }
            if job.status == JobStatus::Paused {
                return Ok(job);
            }

            jobs::set_status(conn, &job_id, JobStatus::Paused, Some("paused by user")).await?;
            user_work::recompute_for_user(conn, &job.username).await?;

            Ok(jobs::get(conn, &job_id).await?.unwrap_or(job))
        })
    })
    .await
}

/// Resume a paused (or preview-parked) job.
pub async fn resume_job(db: &Db, job_id: &str) -> Result<Job> {
    let job_id = job_id.to_string();

    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let job = jobs::get(conn, &job_id)
                .await?
                .ok_or_else(|| OrchestrationError::NotFound(format!("job {job_id}")))?;
            if !matches!(job.status, JobStatus::Paused | JobStatus::Previewing) {
                return Err(OrchestrationError::InvalidRequest(format!(
                    "job {job_id} is {} and cannot be resumed",
                    job.status
                )));
            }

            jobs::set_status(conn, &job_id, JobStatus::Running, Some("")).await?;
            user_work::recompute_for_user(conn, &job.username).await?;

            // Everything may already have finished while the job was
            // parked; no further update will arrive to notice it.
            let all_steps = steps::for_job(conn, &job_id).await?;
            if !all_steps.is_empty() && all_steps.iter().all(|s| s.is_complete) {
                if let Some(fresh) = jobs::get(conn, &job_id).await? {
                    finalize(conn, &fresh).await?;
                }
            }

            Ok(jobs::get(conn, &job_id).await?.unwrap_or(job))
        })
    })
    .await
}
