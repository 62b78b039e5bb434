pub mod queries;

use crate::error::{StoreError, StoreResult};
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use std::fs;
use std::path::Path;

/// Key-value medium holding whole serialized records.
///
/// Writes are rejected once the stored values would exceed `quota_bytes`,
/// mirroring the few-megabyte ceiling of a browser profile's local storage.
pub struct Database {
    conn: Connection,
    quota_bytes: u64,
}

impl Database {
    pub fn open(path: &Path, quota_bytes: u64) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create DB directory: {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite DB: {}", path.display()))?;

        let database = Self { conn, quota_bytes };
        database.init_schema()?;

        Ok(database)
    }

    pub fn open_in_memory(quota_bytes: u64) -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite DB")?;

        let database = Self { conn, quota_bytes };
        database.init_schema()?;

        Ok(database)
    }

    pub fn init_schema(&self) -> Result<()> {
        queries::schema_statements()
            .iter()
            .try_for_each(|statement| {
                self.conn
                    .execute(statement, [])
                    .context("Failed to initialize schema")
                    .map(|_| ())
            })
    }

    pub fn quota_bytes(&self) -> u64 {
        self.quota_bytes
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = self
            .conn
            .query_row(queries::SELECT_VALUE, params![key], |row| row.get(0))
            .optional()?;

        Ok(value)
    }

    pub fn put(&mut self, key: &str, value: &str) -> StoreResult<()> {
        self.put_all(&[(key, value.to_string())])
    }

    /// Writes every entry or none of them.
    pub fn put_all(&mut self, entries: &[(&str, String)]) -> StoreResult<()> {
        let quota = self.quota_bytes;
        let transaction = self.conn.transaction()?;

        entries
            .iter()
            .try_for_each(|(key, value)| write_checked(&transaction, quota, key, value))?;

        transaction.commit()?;
        Ok(())
    }

    pub fn remove_all(&mut self, keys: &[&str]) -> StoreResult<()> {
        let transaction = self.conn.transaction()?;

        keys.iter().try_for_each(|key| {
            transaction
                .execute(queries::DELETE_VALUE, params![key])
                .map(|_| ())
        })?;

        transaction.commit()?;
        Ok(())
    }

    /// Byte size of every stored value, keyed by record key.
    pub fn value_sizes(&self) -> StoreResult<Vec<(String, u64)>> {
        let mut statement = self.conn.prepare(queries::VALUE_SIZES)?;

        let rows = statement
            .query_map([], |row| {
                let size: i64 = row.get(1)?;
                Ok((row.get::<_, String>(0)?, size.max(0) as u64))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }
}

fn write_checked(transaction: &Transaction<'_>, quota: u64, key: &str, value: &str) -> StoreResult<()> {
    let used: i64 = transaction.query_row(queries::USED_BYTES_EXCLUDING, params![key], |row| {
        row.get(0)
    })?;
    let required = used.max(0) as u64 + value.len() as u64;

    if required > quota {
        return Err(StoreError::QuotaExceeded {
            key: key.to_string(),
            required,
            limit: quota,
        });
    }

    transaction.execute(
        queries::UPSERT_VALUE,
        params![key, value, Utc::now().timestamp_millis()],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::Database;
    use crate::error::StoreError;

    #[test]
    fn put_then_get_returns_latest_value() {
        let mut database = Database::open_in_memory(1024).expect("db");
        database.put("a", "1").expect("first write");
        database.put("a", "22").expect("overwrite");

        assert_eq!(database.get("a").expect("read").as_deref(), Some("22"));
        assert_eq!(database.get("missing").expect("read"), None);
    }

    #[test]
    fn quota_counts_replaced_value_once() {
        let mut database = Database::open_in_memory(10).expect("db");
        database.put("a", "123456").expect("fits");
        database.put("a", "1234567890").expect("replacement still fits");

        let error = database.put("b", "x").expect_err("over quota");
        assert!(matches!(error, StoreError::QuotaExceeded { required: 11, limit: 10, .. }));
    }

    #[test]
    fn put_all_rolls_back_on_failure() {
        let mut database = Database::open_in_memory(8).expect("db");
        database.put("keep", "old").expect("seed");

        let result = database.put_all(&[("keep", "new".to_string()), ("big", "x".repeat(16))]);

        assert!(result.is_err());
        assert_eq!(database.get("keep").expect("read").as_deref(), Some("old"));
        assert_eq!(database.get("big").expect("read"), None);
    }

    #[test]
    fn file_backed_database_persists_between_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("store.db");

        let mut first = Database::open(&path, 1024).expect("open");
        first.put("settings", "{}").expect("write");
        drop(first);

        let second = Database::open(&path, 1024).expect("reopen");
        assert_eq!(second.get("settings").expect("read").as_deref(), Some("{}"));
        assert_eq!(second.value_sizes().expect("sizes"), vec![("settings".to_string(), 2)]);
    }
}
