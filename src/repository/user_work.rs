//! Fair-share ready counters per `(username, service)`.
//!
//! An external scheduler reads these to apportion pods between users. The
//! update handler and dispatcher keep them in step with the ready queue:
//! incremented when ready items are inserted, decremented on claim, and
//! recomputed when a job pauses or terminates.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use crate::schema::user_work;

use super::records::UserWorkRecord;
use super::{now_rfc3339, work_items, DieselError, SqliteConn};

/// Add `delta` ready items for the pair, creating the row when missing.
pub async fn add_ready(
    conn: &mut SqliteConn,
    username: &str,
    service_id: &str,
    delta: i32,
) -> Result<(), DieselError> {
    let existing: Option<UserWorkRecord> = user_work::table
        .filter(user_work::username.eq(username))
        .filter(user_work::service_id.eq(service_id))
        .first(conn)
        .await
        .optional()?;

    match existing {
        Some(record) => {
            let next = (record.ready_count + delta).max(0);
            diesel::update(user_work::table.filter(user_work::id.eq(record.id)))
                .set((
                    user_work::ready_count.eq(next),
                    user_work::last_update.eq(now_rfc3339()),
                ))
                .execute(conn)
                .await?;
        }
        None => {
            diesel::insert_into(user_work::table)
                .values((
                    user_work::username.eq(username),
                    user_work::service_id.eq(service_id),
                    user_work::ready_count.eq(delta.max(0)),
                    user_work::last_update.eq(now_rfc3339()),
                ))
                .execute(conn)
                .await?;
        }
    }
    Ok(())
}

pub async fn decrement_ready(
    conn: &mut SqliteConn,
    username: &str,
    service_id: &str,
) -> Result<(), DieselError> {
    add_ready(conn, username, service_id, -1).await
}

/// Recount from the ready queue after a job pauses or terminates; counters
/// only reflect jobs that still accept work.
pub async fn recompute_for_user(conn: &mut SqliteConn, username: &str) -> Result<(), DieselError> {
    let rows: Vec<UserWorkRecord> = user_work::table
        .filter(user_work::username.eq(username))
        .load(conn)
        .await?;

    for row in rows {
        let actual =
            work_items::ready_count_for_user_service(conn, username, &row.service_id).await?;
        diesel::update(user_work::table.filter(user_work::id.eq(row.id)))
            .set((
                user_work::ready_count.eq(actual as i32),
                user_work::last_update.eq(now_rfc3339()),
            ))
            .execute(conn)
            .await?;
    }
    Ok(())
}

pub async fn ready_count(
    conn: &mut SqliteConn,
    username: &str,
    service_id: &str,
) -> Result<i32, DieselError> {
    let record: Option<UserWorkRecord> = user_work::table
        .filter(user_work::username.eq(username))
        .filter(user_work::service_id.eq(service_id))
        .first(conn)
        .await
        .optional()?;
    Ok(record.map(|r| r.ready_count).unwrap_or(0))
}
