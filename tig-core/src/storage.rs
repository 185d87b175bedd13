//! Durable key-value persistence.
//!
//! All metadata lives in a single ordered key space, namespaced by a fixed
//! prefix per entity type (see [`keys`]). [`SqliteKv`] is the on-disk backend;
//! anything implementing [`KvStore`] can stand in for it.

use crate::error::Result;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

const SCHEMA_VERSION: i32 = 1;

/// Key prefixes and key builders for every persisted entity.
pub mod keys {
    pub const CONTENT: &str = "content:";
    pub const GATED: &str = "gated:";
    pub const FILE_STATE: &str = "file_state:";
    pub const TRACKED: &str = "tracked:";
    pub const CHANGESET: &str = "changeset:";
    pub const CHANGESET_TIME: &str = "cs_time:";
    pub const CHANGESET_PATH: &str = "cs_path:";
    pub const CHANGESET_HEAD: &str = "changeset_head";

    pub fn content(hash: &str) -> String {
        format!("{CONTENT}{hash}")
    }

    pub fn gated(path: &str) -> String {
        format!("{GATED}{path}")
    }

    pub fn file_state(path: &str) -> String {
        format!("{FILE_STATE}{path}")
    }

    pub fn tracked(path: &str) -> String {
        format!("{TRACKED}{path}")
    }

    pub fn changeset(id: &str) -> String {
        format!("{CHANGESET}{id}")
    }

    /// Microseconds are zero-padded so lexical key order is chronological order.
    pub fn changeset_time(unix_micros: i64, id: &str) -> String {
        format!("{CHANGESET_TIME}{unix_micros:020}:{id}")
    }

    pub fn changeset_path(path: &str, id: &str) -> String {
        format!("{CHANGESET_PATH}{path}:{id}")
    }

    /// Returns the part of `key` after `prefix`, if `key` starts with it.
    pub fn strip<'a>(key: &'a str, prefix: &str) -> Option<&'a str> {
        key.strip_prefix(prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(String, Vec<u8>),
    Delete(String),
}

/// A set of writes applied atomically by [`KvStore::apply`].
#[derive(Debug, Default, Clone)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.ops.push(BatchOp::Put(key.into(), value.into()));
        self
    }

    pub fn put_json<T: Serialize>(&mut self, key: impl Into<String>, value: &T) -> Result<&mut Self> {
        let data = serde_json::to_vec(value)?;
        Ok(self.put(key, data))
    }

    pub fn delete(&mut self, key: impl Into<String>) -> &mut Self {
        self.ops.push(BatchOp::Delete(key.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }
}

/// The contract every metadata backend must provide.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Deleting a missing key is not an error.
    fn delete(&self, key: &str) -> Result<()>;

    /// All entries whose key starts with `prefix`, in ascending key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    fn apply(&self, batch: WriteBatch) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }
}

pub fn get_json<T: DeserializeOwned>(kv: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match kv.get(key)? {
        Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_json<T: Serialize>(kv: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec(value)?;
    kv.set(key, &data)
}

/// SQLite-backed [`KvStore`].
pub struct SqliteKv {
    conn: Mutex<Connection>,
}

impl SqliteKv {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value BLOB NOT NULL
            ) WITHOUT ROWID;
            "#,
        )?;

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;

        if version.is_none() {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }
}

impl KvStore for SqliteKv {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO kv (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT key, value FROM kv WHERE substr(key, 1, ?2) = ?1 ORDER BY key",
        )?;

        let prefix_len = prefix.chars().count() as i64;
        let rows = stmt
            .query_map(params![prefix, prefix_len], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(rows)
    }

    fn apply(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for op in batch.ops {
            match op {
                BatchOp::Put(key, value) => {
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, value],
                    )?;
                }
                BatchOp::Delete(key) => {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
            }
        }
        tx.commit()?;

        Ok(())
    }
}
