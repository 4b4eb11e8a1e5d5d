//! Persistence layer for the orchestration core.
//!
//! Query functions take a `&mut SqliteConn` so the services can compose
//! them inside a single transaction; the [`Db`] context hands out
//! connections. Record structs live in [`records`] and convert into the
//! domain models.

pub mod batches;
pub mod context;
pub mod jobs;
pub mod migrations;
pub mod pool;
pub mod records;
pub mod steps;
pub mod user_work;
pub mod work_items;

pub use context::Db;
pub use pool::{DieselError, SqliteConn, SqlitePool};

use chrono::{DateTime, Utc};

/// Parse a datetime string from the database, defaulting to Unix epoch on error.
pub fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or(DateTime::UNIX_EPOCH)
}

/// Parse an optional datetime string from the database.
pub fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    })
}

/// Current time as the TEXT representation stored in every timestamp column.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

/// Whether a diesel error is SQLite reporting writer contention.
///
/// The caller decides the retry policy; claims retry once, queued updates
/// go back through the drain loop.
pub fn is_busy(err: &DieselError) -> bool {
    match err {
        DieselError::DatabaseError(_, info) => {
            let msg = info.message();
            msg.contains("database is locked") || msg.contains("database table is locked")
        }
        _ => false,
    }
}
