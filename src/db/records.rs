//! Record reads, writes and iteration.

use crate::error::DatabaseError;
use crate::{Error, Result};
use futures::TryStreamExt;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::KvStore;

impl KvStore {
    /// Fetch and decode the JSON value stored under `key`
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Fetch the stored text under `key` without decoding it
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT val FROM kv_table WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read key {key:?}: {e}"
                )))
            })
    }

    /// Store `value` as JSON under `key`, replacing any previous value
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        self.put_raw(key, &json).await
    }

    /// Store text (for example rendered HTML) under `key` verbatim
    pub async fn put_raw(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO kv_table (key, val) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to write key {key:?}: {e}"
                )))
            })?;
        Ok(())
    }

    /// Call `f` for every record in key order, decoding values as JSON
    ///
    /// Returns the number of records visited.
    pub async fn for_each<T, F>(&self, mut f: F) -> Result<u64>
    where
        T: DeserializeOwned,
        F: FnMut(String, T),
    {
        let mut rows = sqlx::query_as::<_, (String, String)>(
            "SELECT key, val FROM kv_table ORDER BY key",
        )
        .fetch(&self.pool);

        let mut visited = 0;
        while let Some((key, val)) = rows.try_next().await.map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to iterate store: {e}"
            )))
        })? {
            f(key, serde_json::from_str(&val)?);
            visited += 1;
        }
        Ok(visited)
    }

    /// Number of records in the store
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM kv_table")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to count records: {e}"
                )))
            })?;
        Ok(count.max(0) as u64)
    }
}
