//! Step advancer: turns one completed work item into the next step's work.
//!
//! Runs inside the update handler's transaction so that "step k complete"
//! and "step k+1 has ready items" become visible together.

use tracing::debug;

use crate::artifacts::{
    read_catalog, resolve_href, work_item_catalog_url, write_catalog, ArtifactError, ArtifactStore,
};
use crate::config::Settings;
use crate::models::stac::{StacCatalog, StacLink};
use crate::models::{Job, StepKind, WorkItem, WorkItemUpdate, WorkflowStep};
use crate::repository::records::NewWorkItem;
use crate::repository::{steps, user_work, work_items, SqliteConn};

use super::{batcher, OrchestrationError, Result};

/// Generate the next step's work for one completed item. Returns whether
/// any downstream work item was created.
#[allow(clippy::too_many_arguments)]
pub async fn advance(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    settings: &Settings,
    job: &Job,
    step: &WorkflowStep,
    next_step: &WorkflowStep,
    item: &WorkItem,
    update: &WorkItemUpdate,
    all_step_complete: bool,
) -> Result<bool> {
    match next_step.step_kind {
        StepKind::Query => Err(OrchestrationError::InvariantViolation(format!(
            "job {}: query step {} cannot follow step {}",
            job.id, next_step.step_index, step.step_index
        ))),
        StepKind::Map => fan_out(conn, settings, job, step, next_step, item, update).await,
        StepKind::Aggregate => {
            if all_step_complete {
                aggregate(conn, store, settings, job, step, next_step).await
            } else {
                Ok(false)
            }
        }
        StepKind::BatchedAggregate => {
            let emitted = batcher::handle_outputs(
                conn,
                store,
                settings,
                job,
                next_step,
                item.sort_index,
                step.step_kind != StepKind::Query,
                update.results(),
                update.output_item_sizes().unwrap_or(&[]),
                !update.is_failure(),
                all_step_complete,
            )
            .await?;
            Ok(emitted > 0)
        }
    }
}

/// One child work item per output catalog.
///
/// A single-output parent passes its own sort index through; a
/// multi-output producer (the query step) claims a contiguous run of
/// fresh indexes so downstream ordering follows production order, even
/// when its final page holds a single catalog.
async fn fan_out(
    conn: &mut SqliteConn,
    settings: &Settings,
    job: &Job,
    step: &WorkflowStep,
    next_step: &WorkflowStep,
    item: &WorkItem,
    update: &WorkItemUpdate,
) -> Result<bool> {
    let results = update.results();
    if results.is_empty() {
        return Ok(false);
    }

    let single_output_parent = step.step_kind != StepKind::Query && results.len() == 1;
    let sort_start = if single_output_parent {
        item.sort_index
    } else {
        work_items::max_sort_index(conn, &job.id, &next_step.service_id)
            .await?
            .map(|m| m + 1)
            .unwrap_or(0)
    };

    let children: Vec<NewWorkItem> = results
        .iter()
        .enumerate()
        .map(|(i, url)| {
            NewWorkItem::ready(
                &job.id,
                &next_step.service_id,
                next_step.step_index,
                url,
                sort_start + i as i32,
            )
        })
        .collect();

    work_items::insert_chunked(conn, &children, settings.batch_size).await?;
    user_work::add_ready(conn, &job.username, &next_step.service_id, children.len() as i32)
        .await?;

    debug!(
        job_id = %job.id,
        step = next_step.step_index,
        count = children.len(),
        "emitted child work items"
    );
    Ok(true)
}

/// Build one aggregated input from every successful item of the completed
/// step, paged across linked catalogs.
async fn aggregate(
    conn: &mut SqliteConn,
    store: &dyn ArtifactStore,
    settings: &Settings,
    job: &Job,
    step: &WorkflowStep,
    next_step: &WorkflowStep,
) -> Result<bool> {
    let expected = work_items::successful_count_for_step(conn, &job.id, step.step_index).await?;
    let parents = work_items::successful_items_for_step(conn, &job.id, step.step_index).await?;
    if (parents.len() as i64) < expected {
        return Err(OrchestrationError::InvariantViolation(format!(
            "job {}: retrieved {} items of step {} but {} completed successfully",
            job.id,
            parents.len(),
            step.step_index,
            expected
        )));
    }
    if parents.is_empty() {
        // Every upstream item failed or warned; there is nothing to
        // aggregate and the downstream item will never exist.
        steps::decrement_work_item_count(conn, &job.id, next_step.step_index).await?;
        return Ok(false);
    }

    let mut item_hrefs = Vec::new();
    for parent in &parents {
        for catalog_url in parent_catalog_urls(store, parent).await? {
            let catalog = match read_catalog(store, &catalog_url).await {
                Ok(catalog) => catalog,
                Err(ArtifactError::NotFound(url)) => {
                    return Err(OrchestrationError::InvariantViolation(format!(
                        "job {}: parent catalog missing from artifact store: {url}",
                        job.id
                    )))
                }
                Err(e) => return Err(e.into()),
            };
            for href in catalog.item_hrefs() {
                item_hrefs.push(resolve_href(&catalog_url, href));
            }
        }
    }

    // The child is created first so its id can key the catalog layout.
    let child = NewWorkItem::ready(&job.id, &next_step.service_id, next_step.step_index, "", 0);
    let child_id = work_items::insert_one(conn, &child).await?;

    let page_size = settings.aggregate_stac_catalog_max_page_size.max(1);
    let pages: Vec<&[String]> = item_hrefs.chunks(page_size).collect();
    let page_count = pages.len().max(1);
    for (n, page) in pages.iter().enumerate() {
        let mut catalog = StacCatalog::new(
            format!("aggregate-{child_id}-{n}"),
            format!("aggregated inputs for service {}", next_step.service_id),
        );
        if n > 0 {
            catalog.links.push(StacLink::new(
                "prev",
                &work_item_catalog_url(&job.id, child_id, Some(n - 1)),
            ));
        }
        for href in page.iter() {
            catalog.links.push(StacLink::item(href));
        }
        if n + 1 < page_count {
            catalog.links.push(StacLink::new(
                "next",
                &work_item_catalog_url(&job.id, child_id, Some(n + 1)),
            ));
        }
        write_catalog(store, &work_item_catalog_url(&job.id, child_id, Some(n)), &catalog)
            .await?;
    }
    if pages.is_empty() {
        // Successful parents with no items still get an empty first page.
        let catalog = StacCatalog::new(
            format!("aggregate-{child_id}-0"),
            format!("aggregated inputs for service {}", next_step.service_id),
        );
        write_catalog(store, &work_item_catalog_url(&job.id, child_id, Some(0)), &catalog)
            .await?;
    }

    let input_catalog = work_item_catalog_url(&job.id, child_id, Some(0));
    work_items::set_catalog_location(conn, child_id, &input_catalog).await?;
    user_work::add_ready(conn, &job.username, &next_step.service_id, 1).await?;

    debug!(
        job_id = %job.id,
        step = next_step.step_index,
        items = item_hrefs.len(),
        pages = page_count,
        "emitted aggregating work item"
    );
    Ok(true)
}

/// Output catalog URLs for a completed item, from the well-known layout:
/// the multi-catalog index when present, otherwise the single catalog.
async fn parent_catalog_urls(
    store: &dyn ArtifactStore,
    parent: &WorkItem,
) -> Result<Vec<String>> {
    let index_url = format!(
        "/tmp/{}/{}/outputs/batch-catalogs.json",
        parent.job_id, parent.id
    );
    match store.get_json(&index_url).await {
        Ok(value) => {
            let urls: Vec<String> = serde_json::from_value(value).map_err(ArtifactError::from)?;
            Ok(urls)
        }
        Err(ArtifactError::NotFound(_)) => {
            Ok(vec![work_item_catalog_url(&parent.job_id, parent.id, None)])
        }
        Err(e) => Err(e.into()),
    }
}
