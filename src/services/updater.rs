//! Update handler: ingests a worker's terminal report for one work item.
//!
//! The whole sequence — retry decision, counters, step advancement, batch
//! assignment, completion — runs in one transaction so concurrent updates
//! serialize on the database and a duplicate update observes a terminal
//! item and does nothing.

use chrono::Utc;
use diesel_async::AsyncConnection;
use tracing::{debug, error, warn};

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::models::{Job, JobStatus, StepKind, WorkItem, WorkItemStatus, WorkItemUpdate, WorkflowStep};
use crate::repository::records::NewWorkItem;
use crate::repository::{jobs, steps, user_work, work_items, Db, SqliteConn};

use super::{advancer, completer, dispatcher, OrchestrationError, Result};

/// Apply one worker update. An unrecoverable pipeline invariant violation
/// rolls the update back and fails the job in a follow-up transaction; the
/// worker is never shown an internal error either way.
pub async fn process_update(
    db: &Db,
    store: &dyn ArtifactStore,
    settings: &Settings,
    work_item_id: i32,
    update: WorkItemUpdate,
) -> Result<()> {
    match apply(db, store, settings, work_item_id, update).await {
        Err(OrchestrationError::InvariantViolation(message)) => {
            error!(work_item_id, "pipeline invariant violated: {message}");
            fail_for_invariant(db, work_item_id).await
        }
        other => other,
    }
}

async fn apply(
    db: &Db,
    store: &dyn ArtifactStore,
    settings: &Settings,
    work_item_id: i32,
    update: WorkItemUpdate,
) -> Result<()> {
    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let Some(item) = work_items::get(conn, work_item_id).await? else {
                warn!(work_item_id, "update for unknown work item dropped");
                return Ok(());
            };
            // Jobs row first, then the work item: the shared lock order.
            let Some(job) = jobs::get(conn, &item.job_id).await? else {
                warn!(work_item_id, job_id = %item.job_id, "update for unknown job dropped");
                return Ok(());
            };
            if job.status.is_terminal() {
                debug!(
                    work_item_id,
                    job_id = %job.id,
                    job_status = %job.status,
                    "dropping update for terminal job"
                );
                return Ok(());
            }
            if item.status.is_terminal() {
                debug!(work_item_id, "duplicate update for terminal work item dropped");
                return Ok(());
            }

            let step = steps::get(conn, &job.id, item.workflow_step_index)
                .await?
                .ok_or_else(|| {
                    OrchestrationError::InvariantViolation(format!(
                        "work item {} references missing step {} of job {}",
                        item.id, item.workflow_step_index, job.id
                    ))
                })?;

            // Retry before accepting a failure.
            if update.is_failure() && item.retry_count < settings.work_item_retry_limit {
                work_items::requeue_for_retry(conn, item.id).await?;
                user_work::add_ready(conn, &job.username, &item.service_id, 1).await?;
                debug!(
                    work_item_id,
                    retry = item.retry_count + 1,
                    limit = settings.work_item_retry_limit,
                    "requeued failed work item"
                );
                return Ok(());
            }

            // The larger of scheduler- and worker-observed runtime, so a
            // late retry cannot shrink the reported duration.
            let observed = item
                .started_at
                .map(|s| (Utc::now() - s).num_milliseconds().max(0))
                .unwrap_or(0);
            let duration_ms = observed.max(update.duration().unwrap_or(0));
            let status = update.status();
            work_items::finish(
                conn,
                item.id,
                status,
                Some(duration_ms),
                update.total_items_size_mib(),
                update.output_item_sizes(),
            )
            .await?;

            let mut job = job;
            if job.status == JobStatus::Accepted {
                jobs::set_status(conn, &job.id, JobStatus::Running, None).await?;
                job.status = JobStatus::Running;
            }

            // The source catalog reported fewer granules than requested.
            if let Some(hits) = update.hits() {
                if hits >= 0 && hits < job.num_input_granules {
                    shrink_expected_work(conn, settings, &job.id, hits).await?;
                    job.num_input_granules = hits;
                }
            }

            let completed =
                work_items::completed_count_for_step(conn, &job.id, step.step_index).await? as i32;
            let step = steps::get(conn, &job.id, step.step_index)
                .await?
                .ok_or_else(|| {
                    OrchestrationError::InvariantViolation(format!(
                        "step {} of job {} vanished mid-update",
                        item.workflow_step_index, job.id
                    ))
                })?;
            let all_step_complete = completed >= step.work_item_count;
            steps::set_completion(conn, &job.id, step.step_index, completed, all_step_complete)
                .await?;

            if status == WorkItemStatus::Failed {
                let proceeding =
                    accept_failure(conn, settings, &job, &step, &item, update.error_message())
                        .await?;
                if !proceeding {
                    return Ok(());
                }
                job = jobs::get(conn, &job.id).await?.ok_or_else(|| {
                    OrchestrationError::InvariantViolation(format!(
                        "job {} vanished mid-update",
                        item.job_id
                    ))
                })?;
            }

            let next_step = steps::get(conn, &job.id, step.step_index + 1).await?;

            let mut created_child = false;
            if let Some(next) = &next_step {
                // Failed items only reach the advancer where ordering
                // demands it: batched steps need their placeholder, and a
                // trailing failure must still trigger the aggregation.
                let should_advance = !update.is_failure()
                    || next.step_kind.is_batched()
                    || (next.step_kind == StepKind::Aggregate && all_step_complete);
                if should_advance {
                    created_child = advancer::advance(
                        conn,
                        store,
                        settings,
                        &job,
                        &step,
                        next,
                        &item,
                        &update,
                        all_step_complete,
                    )
                    .await?;
                }
            }

            if step.step_kind == StepKind::Query
                && status == WorkItemStatus::Successful
                && !update.results().is_empty()
                && enqueue_query_continuation(conn, settings, &job, &step, &item, &update).await?
            {
                created_child = true;
            }

            if next_step.is_none() || (all_step_complete && !created_child) {
                completer::on_item_complete(
                    conn,
                    store,
                    &job,
                    next_step.as_ref(),
                    &update,
                    all_step_complete,
                )
                .await?;
            } else {
                completer::update_progress(conn, &job.id).await?;
            }

            Ok(())
        })
    })
    .await
}

/// Shrink the granule count and recompute expected item counts for every
/// step that has not finished. A batched step that has started sealing
/// batches owns its own count and is left alone.
async fn shrink_expected_work(
    conn: &mut SqliteConn,
    settings: &Settings,
    job_id: &str,
    hits: i32,
) -> Result<()> {
    jobs::shrink_num_input_granules(conn, job_id, hits).await?;
    for s in steps::for_job(conn, job_id).await? {
        if s.is_complete {
            continue;
        }
        if s.step_kind == StepKind::BatchedAggregate && s.work_item_count > 1 {
            continue;
        }
        let expected = s.expected_item_count(hits, settings.cmr_max_page_size);
        steps::set_work_item_count(conn, job_id, s.step_index, expected).await?;
    }
    debug!(job_id = %job_id, hits, "shrunk expected work after query hits");
    Ok(())
}

/// Apply the failure policy for an accepted (retries exhausted) failure.
/// Returns whether the job keeps going.
async fn accept_failure(
    conn: &mut SqliteConn,
    settings: &Settings,
    job: &Job,
    step: &WorkflowStep,
    item: &WorkItem,
    message: Option<&str>,
) -> Result<bool> {
    let reason = message.unwrap_or("service failure with no error message");

    // Without granules the pipeline has no inputs; ignoreErrors cannot help.
    if step.step_kind == StepKind::Query {
        completer::fail_job_in_tx(
            conn,
            &job.id,
            &job.username,
            &format!("query step failed: {reason}"),
        )
        .await?;
        return Ok(false);
    }

    if !job.ignore_errors {
        completer::fail_job_in_tx(conn, &job.id, &job.username, reason).await?;
        return Ok(false);
    }

    jobs::add_error(conn, &job.id, &item.stac_catalog_location, reason).await?;
    let errors = jobs::error_count(conn, &job.id).await?;
    if errors > settings.max_errors_for_job as i64 {
        completer::fail_job_in_tx(
            conn,
            &job.id,
            &job.username,
            "too many errors; failing the job",
        )
        .await?;
        return Ok(false);
    }

    // One fewer granule flows through every later one-to-one step. The
    // aggregating steps still expect their single item; a batched step
    // sees the failure as a placeholder instead.
    for future in steps::after(conn, &job.id, step.step_index).await? {
        if !future.step_kind.has_aggregated_output() {
            steps::decrement_work_item_count(conn, &job.id, future.step_index).await?;
        }
    }

    if matches!(job.status, JobStatus::Running | JobStatus::Accepted) {
        jobs::set_status(conn, &job.id, JobStatus::RunningWithErrors, None).await?;
    }
    Ok(true)
}

/// After a successful query page, queue the next page while the granule
/// budget allows. The new item carries the scroll cursor forward and the
/// next sort index, keeping downstream ordering strictly monotonic.
async fn enqueue_query_continuation(
    conn: &mut SqliteConn,
    settings: &Settings,
    job: &Job,
    step: &WorkflowStep,
    item: &WorkItem,
    update: &WorkItemUpdate,
) -> Result<bool> {
    let successful =
        work_items::successful_count_for_step(conn, &job.id, step.step_index).await? as i32;
    let remaining = dispatcher::page_limit(
        job.num_input_granules,
        successful,
        settings.cmr_max_page_size,
    );
    if remaining <= 0 {
        return Ok(false);
    }

    let scroll = update
        .scroll_id()
        .map(str::to_string)
        .or_else(|| item.scroll_id.clone());
    let next_page = NewWorkItem::ready(
        &job.id,
        &item.service_id,
        step.step_index,
        &item.stac_catalog_location,
        item.sort_index + 1,
    )
    .with_scroll_id(scroll);
    work_items::insert_chunked(conn, &[next_page], 1).await?;
    user_work::add_ready(conn, &job.username, &item.service_id, 1).await?;
    debug!(job_id = %job.id, remaining, "queued query continuation");
    Ok(true)
}

/// Fail the owning job after an invariant violation rolled the update back.
async fn fail_for_invariant(db: &Db, work_item_id: i32) -> Result<()> {
    let mut conn = db.conn().await?;
    conn.transaction(|conn| {
        Box::pin(async move {
            let Some(item) = work_items::get(conn, work_item_id).await? else {
                return Ok(());
            };
            let Some(job) = jobs::get(conn, &item.job_id).await? else {
                return Ok(());
            };
            if !job.status.is_terminal() {
                completer::fail_job_in_tx(
                    conn,
                    &job.id,
                    &job.username,
                    "internal processing error",
                )
                .await?;
            }
            Ok(())
        })
    })
    .await
}
