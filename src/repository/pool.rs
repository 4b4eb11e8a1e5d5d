//! Async SQLite connections via diesel-async's SyncConnectionWrapper.
//!
//! SQLite connections are lightweight, so the pool creates one per request
//! instead of keeping a set alive. Every connection gets the same pragma
//! block: WAL for concurrent readers, a generous busy timeout so writer
//! contention surfaces as a wait instead of an immediate error.

use diesel::sqlite::SqliteConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, SimpleAsyncConnection};

/// Diesel error type alias.
pub type DieselError = diesel::result::Error;

/// Async SQLite connection type.
pub type SqliteConn = SyncConnectionWrapper<SqliteConnection>;

const CONNECTION_PRAGMAS: &str = r#"
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA foreign_keys = ON;
    PRAGMA busy_timeout = 30000;
"#;

/// A simple async connection factory for SQLite.
#[derive(Clone)]
pub struct SqlitePool {
    database_url: String,
}

impl SqlitePool {
    /// Create a new pool. A `sqlite:` URL prefix is accepted and stripped.
    pub fn new(database_url: &str) -> Self {
        let url = database_url.strip_prefix("sqlite:").unwrap_or(database_url);
        Self {
            database_url: url.to_string(),
        }
    }

    /// Get a new connection with the standard pragmas applied.
    pub async fn get(&self) -> Result<SqliteConn, DieselError> {
        let mut conn = SqliteConn::establish(&self.database_url)
            .await
            .map_err(|e| {
                DieselError::DatabaseError(
                    diesel::result::DatabaseErrorKind::UnableToSendCommand,
                    Box::new(e.to_string()),
                )
            })?;
        conn.batch_execute(CONNECTION_PRAGMAS).await?;
        Ok(conn)
    }

    /// Get the database URL (without the `sqlite:` prefix).
    pub fn database_url(&self) -> &str {
        &self.database_url
    }
}
