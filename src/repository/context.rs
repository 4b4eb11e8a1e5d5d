//! Database context: owns the pool and hands out connections.

use std::path::Path;

use super::migrations;
use super::pool::{DieselError, SqliteConn, SqlitePool};

/// Entry point for database access. Create one per process and clone
/// freely; connections are created on demand.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    /// Create a context from a database URL.
    pub fn from_url(database_url: &str) -> Self {
        Self {
            pool: SqlitePool::new(database_url),
        }
    }

    /// Create a context from a file path.
    pub fn from_path(db_path: &Path) -> Self {
        Self::from_url(&db_path.display().to_string())
    }

    /// Get a connection.
    pub async fn conn(&self) -> Result<SqliteConn, DieselError> {
        self.pool.get().await
    }

    /// Run any pending schema migrations.
    pub async fn migrate(&self) -> Result<(), DieselError> {
        migrations::run_migrations(self.pool.database_url()).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
