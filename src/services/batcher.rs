//! Batch engine: groups stream-ordered step outputs into bounded batches
//! for a downstream aggregating service.
//!
//! Outputs arrive from many parallel workers in arbitrary order; batch
//! items carry the canonical sort index and are only assigned to a batch
//! once they are contiguous with it. Failed upstream items leave a
//! placeholder behind so the ordering stays gap-free without counting
//! toward batch limits.

use tracing::{debug, warn};

use crate::artifacts::{
    batch_catalog_url, read_catalog, resolve_href, write_catalog, ArtifactError, ArtifactStore,
};
use crate::config::Settings;
use crate::models::stac::{StacCatalog, StacLink, REL_HARMONY_SOURCE};
use crate::models::{Batch, Job, WorkflowStep};
use crate::repository::records::{NewBatchItem, NewWorkItem};
use crate::repository::{batches, now_rfc3339, steps, user_work, work_items, SqliteConn};

use super::{OrchestrationError, Result};

/// Record one upstream item's outputs and extend the current batch as far
/// as the pending queue is contiguous. Returns the number of aggregating
/// work items emitted. Runs inside the caller's transaction.
#[allow(clippy::too_many_arguments)]
pub async fn handle_outputs(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    settings: &Settings,
    job: &Job,
    next_step: &WorkflowStep,
    parent_sort_index: i32,
    parent_single_output: bool,
    results: &[String],
    output_item_sizes: &[i64],
    parent_produced_output: bool,
    all_step_complete: bool,
) -> Result<usize> {
    insert_pending_items(
        conn,
        store,
        job,
        next_step,
        parent_sort_index,
        parent_single_output,
        results,
        output_item_sizes,
        parent_produced_output,
    )
    .await?;

    assign_pending(conn, store, settings, job, next_step, all_step_complete).await
}

/// Stage the parent's outputs as unassigned batch items.
#[allow(clippy::too_many_arguments)]
async fn insert_pending_items(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    job: &Job,
    next_step: &WorkflowStep,
    parent_sort_index: i32,
    parent_single_output: bool,
    results: &[String],
    output_item_sizes: &[i64],
    parent_produced_output: bool,
) -> Result<()> {
    let now = now_rfc3339();
    let mut new_items = Vec::new();

    if !parent_produced_output || results.is_empty() {
        // Placeholder keeps the sort order contiguous past the failure.
        new_items.push(NewBatchItem {
            job_id: job.id.clone(),
            service_id: next_step.service_id.clone(),
            batch_id: None,
            stac_item_url: None,
            item_size: 0,
            sort_index: parent_sort_index,
            created_at: now,
        });
    } else {
        let sort_start = if parent_single_output && results.len() == 1 {
            parent_sort_index
        } else {
            batches::max_sort_index(conn, &job.id, &next_step.service_id)
                .await?
                .map(|m| m + 1)
                .unwrap_or(0)
        };
        for (i, catalog_url) in results.iter().enumerate() {
            let item_url = first_item_url(store, catalog_url).await?;
            // An item-less catalog degrades to a placeholder; it must not
            // carry weight either.
            let item_size = if item_url.is_some() {
                output_item_sizes.get(i).copied().unwrap_or(0)
            } else {
                0
            };
            new_items.push(NewBatchItem {
                job_id: job.id.clone(),
                service_id: next_step.service_id.clone(),
                batch_id: None,
                stac_item_url: item_url,
                item_size,
                sort_index: sort_start + i as i32,
                created_at: now.clone(),
            });
        }
    }

    batches::insert_items(conn, &new_items).await?;
    Ok(())
}

/// The URL of the first item in an output catalog, or `None` when the
/// catalog lists no items (treated as a placeholder).
async fn first_item_url(store: &dyn ArtifactStore, catalog_url: &str) -> Result<Option<String>> {
    let catalog = match read_catalog(store, catalog_url).await {
        Ok(catalog) => catalog,
        Err(ArtifactError::NotFound(url)) => {
            return Err(OrchestrationError::InvariantViolation(format!(
                "output catalog missing from artifact store: {url}"
            )))
        }
        Err(e) => return Err(e.into()),
    };
    Ok(catalog
        .item_hrefs()
        .first()
        .map(|href| resolve_href(catalog_url, href)))
}

/// Walk the pending queue in sort order, extending the current batch while
/// items stay contiguous, sealing whenever a bound is reached.
async fn assign_pending(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    settings: &Settings,
    job: &Job,
    next_step: &WorkflowStep,
    all_step_complete: bool,
) -> Result<usize> {
    let max_items = next_step.max_batch_inputs.unwrap_or(settings.max_batch_inputs) as i64;
    let max_bytes = next_step
        .max_batch_size_bytes
        .unwrap_or(settings.max_batch_size_in_bytes);

    let pending = batches::unassigned_items(conn, &job.id, &next_step.service_id).await?;

    let mut current = match batches::current_batch(conn, &job.id, &next_step.service_id).await? {
        Some(batch) => batch,
        None => batches::create(conn, &job.id, &next_step.service_id, 0).await?,
    };
    let (mut current_count, mut current_size) =
        batches::batch_fill(conn, &job.id, &next_step.service_id, current.batch_id).await?;
    let mut expected_sort =
        next_sort_index(conn, &job.id, &next_step.service_id, &current).await?;

    let mut emitted = 0usize;

    for item in pending {
        if item.sort_index != expected_sort {
            // A gap: items further along are not yet contiguous with the
            // current batch. They stay pending for a later update.
            break;
        }

        let fits = item.is_placeholder()
            || (current_count + 1 <= max_items && current_size + item.item_size <= max_bytes);

        if !fits && current_count > 0 {
            if seal_batch(conn, store, settings, job, next_step, &current).await? {
                emitted += 1;
            }
            current =
                batches::create(conn, &job.id, &next_step.service_id, current.batch_id + 1)
                    .await?;
            current_count = 0;
            current_size = 0;
        }

        batches::assign_item(conn, item.id, current.batch_id).await?;
        expected_sort += 1;
        if !item.is_placeholder() {
            current_count += 1;
            current_size += item.item_size;
        }

        if current_count >= max_items || current_size >= max_bytes {
            if seal_batch(conn, store, settings, job, next_step, &current).await? {
                emitted += 1;
            }
            current =
                batches::create(conn, &job.id, &next_step.service_id, current.batch_id + 1)
                    .await?;
            current_count = 0;
            current_size = 0;
        }
    }

    if all_step_complete {
        let remaining =
            batches::items_in_batch(conn, &job.id, &next_step.service_id, current.batch_id)
                .await?;
        if !remaining.is_empty()
            && seal_batch(conn, store, settings, job, next_step, &current).await?
        {
            emitted += 1;
        }
    }

    Ok(emitted)
}

/// Where the next contiguous sort index must land for the current batch.
async fn next_sort_index(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
    current: &Batch,
) -> Result<i32> {
    if let Some(max) =
        batches::max_sort_index_in_batch(conn, job_id, service_id, current.batch_id).await?
    {
        return Ok(max + 1);
    }
    if current.batch_id > 0 {
        match batches::max_sort_index_in_batch(conn, job_id, service_id, current.batch_id - 1)
            .await?
        {
            Some(max) => Ok(max + 1),
            // The prior batch was sealed, so it must hold items.
            None => Err(OrchestrationError::InvariantViolation(format!(
                "batch {} of job {job_id} is empty but batch {} exists",
                current.batch_id - 1,
                current.batch_id
            ))),
        }
    } else {
        Ok(0)
    }
}

/// Seal a batch: write its aggregation catalog and emit the downstream
/// work item. A batch holding only placeholders is discarded instead;
/// there is nothing for the aggregating service to do with it.
async fn seal_batch(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    settings: &Settings,
    job: &Job,
    next_step: &WorkflowStep,
    batch: &Batch,
) -> Result<bool> {
    let items =
        batches::items_in_batch(conn, &job.id, &next_step.service_id, batch.batch_id).await?;
    let real: Vec<_> = items.iter().filter(|i| !i.is_placeholder()).collect();

    if real.is_empty() {
        warn!(
            job_id = %job.id,
            batch_id = batch.batch_id,
            "discarding batch with no real items"
        );
        if batch.batch_id == 0 {
            // The step's expected single batch never materialized.
            steps::decrement_work_item_count(conn, &job.id, next_step.step_index).await?;
        }
        return Ok(false);
    }

    let mut catalog = StacCatalog::new(
        format!("batch-{}", batch.batch_id),
        format!(
            "batch {} inputs for service {}",
            batch.batch_id, next_step.service_id
        ),
    );
    catalog
        .links
        .push(StacLink::new(REL_HARMONY_SOURCE, &format!("/jobs/{}", job.id)));
    for item in &real {
        if let Some(url) = &item.stac_item_url {
            catalog.links.push(StacLink::item(url));
        }
    }

    let url = batch_catalog_url(
        &settings.artifact_bucket,
        &job.id,
        next_step.step_index,
        batch.batch_id,
    );
    write_catalog(store, &url, &catalog).await?;

    let child = NewWorkItem::ready(
        &job.id,
        &next_step.service_id,
        next_step.step_index,
        &url,
        batch.batch_id,
    );
    work_items::insert_chunked(conn, &[child], 1).await?;
    user_work::add_ready(conn, &job.username, &next_step.service_id, 1).await?;
    if batch.batch_id > 0 {
        steps::increment_work_item_count(conn, &job.id, next_step.step_index, 1).await?;
    }

    // The deploy environment's scheduler polls for ready items; nothing
    // further to signal from here.
    debug!(
        job_id = %job.id,
        batch_id = batch.batch_id,
        items = real.len(),
        catalog = %url,
        "sealed batch"
    );
    Ok(true)
}
