//! Store lifecycle: open, table creation, close.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::KvStore;

impl KvStore {
    /// Open (creating if needed) the store at `path`
    ///
    /// Uses a rollback journal rather than WAL so that a closed store is a
    /// single self-contained file that can be archived as-is.
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse store path {}: {}",
                    path.display(),
                    e
                )))
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);

        // Single writer per store
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to open store {}: {}",
                    path.display(),
                    e
                )))
            })?;

        sqlx::query("CREATE TABLE IF NOT EXISTS kv_table (key TEXT PRIMARY KEY, val TEXT)")
            .execute(&pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::SchemaFailed(format!(
                    "Failed to create kv_table in {}: {}",
                    path.display(),
                    e
                )))
            })?;

        tracing::debug!(path = %path.display(), "Opened key/value store");

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    /// Flush and close the store
    ///
    /// Idempotent; later queries fail with [`DatabaseError::QueryFailed`].
    pub async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            tracing::debug!(path = %self.path.display(), "Closed key/value store");
        }
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }
}
