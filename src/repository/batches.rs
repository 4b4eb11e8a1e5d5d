//! Batch and batch-item queries for the aggregation batch engine.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::models::{Batch, BatchItem};
use crate::schema::{batch_items, batches};

use super::records::{BatchItemRecord, BatchRecord, NewBatch, NewBatchItem};
use super::{now_rfc3339, DieselError, SqliteConn};

pub async fn insert_items(
    conn: &mut SqliteConn,
    items: &[NewBatchItem],
) -> Result<(), DieselError> {
    if items.is_empty() {
        return Ok(());
    }
    for item in items {
        diesel::insert_into(batch_items::table)
            .values(item)
            .execute(conn)
            .await?;
    }
    Ok(())
}

/// Items not yet assigned to a batch, in sort order.
pub async fn unassigned_items(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
) -> Result<Vec<BatchItem>, DieselError> {
    batch_items::table
        .filter(batch_items::job_id.eq(job_id))
        .filter(batch_items::service_id.eq(service_id))
        .filter(batch_items::batch_id.is_null())
        .order(batch_items::sort_index.asc())
        .load::<BatchItemRecord>(conn)
        .await
        .map(|records| records.into_iter().map(BatchItem::from).collect())
}

/// The batch with the highest id, i.e. the only unsealed one.
pub async fn current_batch(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
) -> Result<Option<Batch>, DieselError> {
    batches::table
        .filter(batches::job_id.eq(job_id))
        .filter(batches::service_id.eq(service_id))
        .order(batches::batch_id.desc())
        .first::<BatchRecord>(conn)
        .await
        .optional()
        .map(|opt| opt.map(Batch::from))
}

pub async fn create(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
    batch_id: i32,
) -> Result<Batch, DieselError> {
    let created_at = now_rfc3339();
    let record = NewBatch {
        job_id,
        service_id,
        batch_id,
        created_at: &created_at,
    };
    diesel::insert_into(batches::table)
        .values(&record)
        .execute(conn)
        .await?;
    Ok(Batch {
        id: 0,
        job_id: job_id.to_string(),
        service_id: service_id.to_string(),
        batch_id,
    })
}

pub async fn assign_item(
    conn: &mut SqliteConn,
    item_id: i32,
    batch_id: i32,
) -> Result<(), DieselError> {
    diesel::update(batch_items::table.filter(batch_items::id.eq(item_id)))
        .set(batch_items::batch_id.eq(batch_id))
        .execute(conn)
        .await?;
    Ok(())
}

/// Items of one batch, in sort order.
pub async fn items_in_batch(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
    batch_id: i32,
) -> Result<Vec<BatchItem>, DieselError> {
    batch_items::table
        .filter(batch_items::job_id.eq(job_id))
        .filter(batch_items::service_id.eq(service_id))
        .filter(batch_items::batch_id.eq(batch_id))
        .order(batch_items::sort_index.asc())
        .load::<BatchItemRecord>(conn)
        .await
        .map(|records| records.into_iter().map(BatchItem::from).collect())
}

pub async fn max_sort_index_in_batch(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
    batch_id: i32,
) -> Result<Option<i32>, DieselError> {
    use diesel::dsl::max;
    batch_items::table
        .filter(batch_items::job_id.eq(job_id))
        .filter(batch_items::service_id.eq(service_id))
        .filter(batch_items::batch_id.eq(batch_id))
        .select(max(batch_items::sort_index))
        .first(conn)
        .await
}

/// Current fill of a batch: non-placeholder item count and total bytes.
pub async fn batch_fill(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
    batch_id: i32,
) -> Result<(i64, i64), DieselError> {
    use diesel::dsl::count_star;
    use diesel::sql_types::{BigInt, Nullable};
    let count: i64 = batch_items::table
        .filter(batch_items::job_id.eq(job_id))
        .filter(batch_items::service_id.eq(service_id))
        .filter(batch_items::batch_id.eq(batch_id))
        .filter(batch_items::stac_item_url.is_not_null())
        .select(count_star())
        .first(conn)
        .await?;
    let size: Option<i64> = batch_items::table
        .filter(batch_items::job_id.eq(job_id))
        .filter(batch_items::service_id.eq(service_id))
        .filter(batch_items::batch_id.eq(batch_id))
        .select(diesel::dsl::sql::<Nullable<BigInt>>("CAST(SUM(item_size) AS BIGINT)"))
        .first(conn)
        .await?;
    Ok((count, size.unwrap_or(0)))
}

/// Highest sort index ever recorded for `(job, service)`, assigned or not.
pub async fn max_sort_index(
    conn: &mut SqliteConn,
    job_id: &str,
    service_id: &str,
) -> Result<Option<i32>, DieselError> {
    use diesel::dsl::max;
    batch_items::table
        .filter(batch_items::job_id.eq(job_id))
        .filter(batch_items::service_id.eq(service_id))
        .select(max(batch_items::sort_index))
        .first(conn)
        .await
}
