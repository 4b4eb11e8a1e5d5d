//! Work item queries: claiming, terminal updates, and the counters the
//! update handler recomputes after every accepted update.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{WorkItem, WorkItemStatus};
use crate::schema::{jobs, work_items};

use super::records::{NewWorkItem, WorkItemRecord};
use super::{now_rfc3339, DieselError, SqliteConn};

/// Job statuses whose work items may be handed to workers.
const ACTIVE_JOB_STATUSES: [&str; 4] = ["accepted", "previewing", "running", "running_with_errors"];

/// Statuses that count toward a step's `completed_count`.
const COMPLETED_STATUSES: [&str; 3] = ["successful", "failed", "warning"];

/// Insert ready items in chunks to bound statement size.
pub async fn insert_chunked(
    conn: &mut SqliteConn,
    items: &[NewWorkItem],
    chunk_size: usize,
) -> Result<usize, DieselError> {
    let chunk_size = chunk_size.max(1);
    for chunk in items.chunks(chunk_size) {
        for item in chunk {
            diesel::insert_into(work_items::table)
                .values(item)
                .execute(conn)
                .await?;
        }
    }
    Ok(items.len())
}

/// Insert a single item and return its assigned id.
pub async fn insert_one(conn: &mut SqliteConn, item: &NewWorkItem) -> Result<i32, DieselError> {
    use diesel::dsl::sql;
    use diesel::sql_types::Integer;

    diesel::insert_into(work_items::table)
        .values(item)
        .execute(conn)
        .await?;
    diesel::select(sql::<Integer>("last_insert_rowid()"))
        .get_result::<i32>(conn)
        .await
}

/// Point an item at its (late-written) input catalog.
pub async fn set_catalog_location(
    conn: &mut SqliteConn,
    id: i32,
    stac_catalog_location: &str,
) -> Result<(), DieselError> {
    diesel::update(work_items::table.filter(work_items::id.eq(id)))
        .set((
            work_items::stac_catalog_location.eq(stac_catalog_location),
            work_items::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn get(conn: &mut SqliteConn, id: i32) -> Result<Option<WorkItem>, DieselError> {
    work_items::table
        .filter(work_items::id.eq(id))
        .first::<WorkItemRecord>(conn)
        .await
        .optional()
        .map(|opt| opt.map(WorkItem::from))
}

/// Oldest ready item for a service, FIFO by `(created_at, id)`, restricted
/// to jobs that currently accept work.
pub async fn next_ready_for_service(
    conn: &mut SqliteConn,
    service_id: &str,
) -> Result<Option<WorkItem>, DieselError> {
    work_items::table
        .inner_join(jobs::table)
        .filter(work_items::service_id.eq(service_id))
        .filter(work_items::status.eq(WorkItemStatus::Ready.as_str()))
        .filter(jobs::status.eq_any(ACTIVE_JOB_STATUSES))
        .order((work_items::created_at.asc(), work_items::id.asc()))
        .select(WorkItemRecord::as_select())
        .first::<WorkItemRecord>(conn)
        .await
        .optional()
        .map(|opt| opt.map(WorkItem::from))
}

/// Whether any item of the step is currently running.
pub async fn has_running_for_step(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<bool, DieselError> {
    use diesel::dsl::count_star;
    let count: i64 = work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::step_index.eq(step_index))
        .filter(work_items::status.eq(WorkItemStatus::Running.as_str()))
        .select(count_star())
        .first(conn)
        .await?;
    Ok(count > 0)
}

pub async fn mark_running(
    conn: &mut SqliteConn,
    id: i32,
    started_at: DateTime<Utc>,
) -> Result<(), DieselError> {
    diesel::update(work_items::table.filter(work_items::id.eq(id)))
        .set((
            work_items::status.eq(WorkItemStatus::Running.as_str()),
            work_items::started_at.eq(started_at.to_rfc3339()),
            work_items::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Put a failed item back in the ready queue, charging one retry.
pub async fn requeue_for_retry(conn: &mut SqliteConn, id: i32) -> Result<(), DieselError> {
    diesel::update(work_items::table.filter(work_items::id.eq(id)))
        .set((
            work_items::status.eq(WorkItemStatus::Ready.as_str()),
            work_items::retry_count.eq(work_items::retry_count + 1),
            work_items::started_at.eq(None::<String>),
            work_items::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Persist a terminal update for an item.
pub async fn finish(
    conn: &mut SqliteConn,
    id: i32,
    status: WorkItemStatus,
    duration_ms: Option<i64>,
    total_items_size: Option<f64>,
    output_item_sizes: Option<&[i64]>,
) -> Result<(), DieselError> {
    let sizes_json = output_item_sizes.map(|s| serde_json::to_string(s).unwrap_or_default());
    diesel::update(work_items::table.filter(work_items::id.eq(id)))
        .set((
            work_items::status.eq(status.as_str()),
            work_items::duration_ms.eq(duration_ms),
            work_items::total_items_size.eq(total_items_size),
            work_items::output_item_sizes.eq(sizes_json),
            work_items::updated_at.eq(now_rfc3339()),
        ))
        .execute(conn)
        .await?;
    Ok(())
}

/// Items of a step that have reached a counted terminal state.
pub async fn completed_count_for_step(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<i64, DieselError> {
    use diesel::dsl::count_star;
    work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::step_index.eq(step_index))
        .filter(work_items::status.eq_any(COMPLETED_STATUSES))
        .select(count_star())
        .first(conn)
        .await
}

pub async fn successful_count_for_step(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<i64, DieselError> {
    use diesel::dsl::count_star;
    work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::step_index.eq(step_index))
        .filter(work_items::status.eq(WorkItemStatus::Successful.as_str()))
        .select(count_star())
        .first(conn)
        .await
}

/// Successful items of a step in canonical output order.
pub async fn successful_items_for_step(
    conn: &mut SqliteConn,
    job_id: &str,
    step_index: i32,
) -> Result<Vec<WorkItem>, DieselError> {
    work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::step_index.eq(step_index))
        .filter(work_items::status.eq(WorkItemStatus::Successful.as_str()))
        .order(work_items::sort_index.asc())
        .load::<WorkItemRecord>(conn)
        .await
        .map(|records| records.into_iter().map(WorkItem::from).collect())
}

/// Highest sort index assigned so far for `(job, service)`.
pub async fn max_sort_index(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
) -> Result<Option<i32>, DieselError> {
    use diesel::dsl::max;
    work_items::table
        .filter(work_items::job_id.eq(job_id))
        .filter(work_items::service_id.eq(service_id))
        .select(max(work_items::sort_index))
        .first(conn)
        .await
}

/// Cancel every item still ready or running; returns how many were swept.
pub async fn cancel_open_for_job(conn: &mut SqliteConn, job_id: &str) -> Result<usize, DieselError> {
    diesel::update(
        work_items::table
            .filter(work_items::job_id.eq(job_id))
            .filter(work_items::status.eq_any([
                WorkItemStatus::Ready.as_str(),
                WorkItemStatus::Running.as_str(),
            ])),
    )
    .set((
        work_items::status.eq(WorkItemStatus::Canceled.as_str()),
        work_items::updated_at.eq(now_rfc3339()),
    ))
    .execute(conn)
    .await
}

/// All items of a job, for status reporting.
pub async fn for_job(conn: &mut SqliteConn, job_id: &str) -> Result<Vec<WorkItem>, DieselError> {
    work_items::table
        .filter(work_items::job_id.eq(job_id))
        .order((work_items::step_index.asc(), work_items::sort_index.asc()))
        .load::<WorkItemRecord>(conn)
        .await
        .map(|records| records.into_iter().map(WorkItem::from).collect())
}

/// Ready-item count per service for one user, for the fair-share counters.
pub async fn ready_count_for_user_service(
    conn: &mut SqliteConn,
    username: &str,
    service_id: &str,
) -> Result<i64, DieselError> {
    use diesel::dsl::count_star;
    work_items::table
        .inner_join(jobs::table)
        .filter(jobs::username.eq(username))
        .filter(jobs::status.eq_any(ACTIVE_JOB_STATUSES))
        .filter(work_items::service_id.eq(service_id))
        .filter(work_items::status.eq(WorkItemStatus::Ready.as_str()))
        .select(count_star())
        .first(conn)
        .await
}
