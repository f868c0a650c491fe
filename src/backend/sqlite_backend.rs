//! Relational backend: one SQLite table behind the store contract.
//!
//! The whole store is a single file (`db.sqlite3`) inside the store
//! directory, holding one two-column table with a unique index on the key.
//! One persistent connection serves every operation; writes commit before
//! the call returns.

use std::fs;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use super::{BackendKind, Items, Keys, KvStore};
use crate::error::{Result, StoreError};
use crate::serializer::{JsonSerializer, Serializer};
use crate::value::Value;

/// Database file name, fixed inside the store directory.
const DB_FILE: &str = "db.sqlite3";

/// Reopening an existing store must leave its data alone, so the schema
/// only creates what is missing.
const SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS kv (key TEXT NOT NULL, value TEXT NOT NULL);
CREATE UNIQUE INDEX IF NOT EXISTS idx_kv_key ON kv (key);
";

/// Store backed by one SQLite table.
///
/// `set` compiles to a single `INSERT .. ON CONFLICT DO UPDATE`, so an
/// upsert is one atomic statement rather than a read-then-write pair. Bulk
/// inserts run one transaction per flushed batch; duplicate keys in a batch
/// hit the unique index and fail the whole flush. Iteration orders rows
/// with `ORDER BY key` under SQLite's default BINARY collation, which is
/// byte-wise over the UTF-8 text and therefore matches the ordered-log
/// engine exactly.
#[derive(Debug)]
pub struct SqliteStore<S: Serializer = JsonSerializer> {
    conn: Connection,
    dir: PathBuf,
    serializer: S,
}

impl<S: Serializer> SqliteStore<S> {
    /// Default flush threshold for [`insert`](KvStore::insert).
    pub const DEFAULT_BATCH_SIZE: usize = 1000;

    /// Open the store in `dir`, creating the directory and schema when
    /// absent. A directory that already holds a store is resumed unchanged.
    pub fn open<P: AsRef<Path>>(dir: P, serializer: S) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let file = dir.join(DB_FILE);
        let conn = Connection::open(&file).map_err(|e| {
            StoreError::Backend(format!("failed to open {}: {e}", file.display()))
        })?;
        conn.execute_batch(SCHEMA)?;
        debug!(file = %file.display(), "opened relational store");
        Ok(Self { conn, dir, serializer })
    }

    /// Append `batch` in one transaction and clear it. Plain inserts: a key
    /// already present in the table aborts the whole flush against the
    /// unique index.
    fn flush_batch(&self, batch: &mut Vec<(String, String)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached("INSERT INTO kv (key, value) VALUES (?1, ?2)")?;
            for (key, text) in batch.iter() {
                stmt.execute([key.as_str(), text.as_str()])?;
            }
        }
        tx.commit()?;
        debug!(records = batch.len(), "flushed insert batch");
        batch.clear();
        Ok(())
    }
}

impl<S: Serializer> KvStore for SqliteStore<S> {
    fn get(&self, key: &str) -> Result<Value> {
        let mut stmt = self.conn.prepare_cached("SELECT value FROM kv WHERE key = ?1")?;
        let text: Option<String> = stmt.query_row([key], |row| row.get(0)).optional()?;
        match text {
            Some(text) => self.serializer.deserialize(&text),
            None => Err(StoreError::NotFound(key.to_owned())),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let text = self.serializer.serialize(value)?;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO kv (key, value) VALUES (?1, ?2) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )?;
        stmt.execute([key, text.as_str()])?;
        Ok(())
    }

    fn insert<I>(&self, pairs: I, batch_size: usize) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        if batch_size == 1 {
            for (key, value) in pairs {
                self.set(&key, &value)?;
            }
            return Ok(());
        }

        let mut batch: Vec<(String, String)> = Vec::new();
        for (key, value) in pairs {
            let text = self.serializer.serialize(&value)?;
            batch.push((key, text));
            if batch.len() >= batch_size {
                self.flush_batch(&mut batch)?;
            }
        }
        self.flush_batch(&mut batch)
    }

    fn keys(&self, reverse: bool) -> Result<Keys<'_>> {
        let sql = if reverse {
            "SELECT key FROM kv ORDER BY key DESC"
        } else {
            "SELECT key FROM kv ORDER BY key ASC"
        };
        // rusqlite rows borrow their statement, so the ordered keys are
        // fetched up front.
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let keys = rows.collect::<std::result::Result<Vec<String>, rusqlite::Error>>()?;
        Ok(Box::new(keys.into_iter().map(Ok)))
    }

    fn items(&self, reverse: bool) -> Result<Items<'_>> {
        let sql = if reverse {
            "SELECT key, value FROM kv ORDER BY key DESC"
        } else {
            "SELECT key, value FROM kv ORDER BY key ASC"
        };
        // Rows are fetched up front like in keys(); decoding stays lazy so
        // a partially consumed iterator never pays for the rest.
        let mut stmt = self.conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let rows = rows.collect::<std::result::Result<Vec<(String, String)>, rusqlite::Error>>()?;
        let serializer = &self.serializer;
        Ok(Box::new(rows.into_iter().map(move |(key, text)| {
            let value = serializer.deserialize(&text)?;
            Ok((key, value))
        })))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Relational
    }

    fn path(&self) -> &Path {
        &self.dir
    }

    fn close(self) -> Result<()> {
        debug!(dir = %self.dir.display(), "closing relational store");
        self.conn
            .close()
            .map_err(|(_, e)| StoreError::Backend(format!("failed to close connection: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn open_store(dir: &Path) -> SqliteStore {
        SqliteStore::open(dir, JsonSerializer).expect("open store")
    }

    #[test]
    fn test_file_layout() -> Result<()> {
        let dir = tempdir()?;
        let store = open_store(dir.path());
        store.set("k", &Value::from("v"))?;
        assert!(dir.path().join(DB_FILE).exists());
        store.close()
    }

    #[test]
    fn test_persistence_across_reopen() -> Result<()> {
        let dir = tempdir()?;

        // Session 1: Write data
        {
            let store = open_store(dir.path());
            store.set("persistent", &Value::Int(7))?;
            store.close()?;
        }

        // Session 2: Verify persistence
        {
            let store = open_store(dir.path());
            assert_eq!(store.get("persistent")?, Value::Int(7));
            store.close()?;
        }
        Ok(())
    }

    #[test]
    fn test_bulk_insert_rejects_existing_key() -> Result<()> {
        let dir = tempdir()?;
        let store = open_store(dir.path());
        store.set("a", &Value::Int(1))?;

        let pairs = vec![("a".to_owned(), Value::Int(2))];
        match store.insert(pairs, 2) {
            Err(StoreError::Backend(_)) => {}
            other => panic!("expected unique-index violation, got {other:?}"),
        }

        // The conflicting flush must not have touched the existing row.
        assert_eq!(store.get("a")?, Value::Int(1));
        store.close()
    }

    #[test]
    fn test_failed_flush_keeps_earlier_batches() -> Result<()> {
        let dir = tempdir()?;
        let store = open_store(dir.path());
        store.set("dup", &Value::Int(0))?;

        // First batch (b1, b2) commits; the second one trips over "dup".
        let pairs = vec![
            ("b1".to_owned(), Value::Int(1)),
            ("b2".to_owned(), Value::Int(2)),
            ("dup".to_owned(), Value::Int(3)),
            ("b4".to_owned(), Value::Int(4)),
        ];
        assert!(store.insert(pairs, 2).is_err());

        let keys = store.keys(false)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(keys, vec!["b1", "b2", "dup"]);
        assert_eq!(store.get("dup")?, Value::Int(0));
        store.close()
    }

    #[test]
    fn test_two_connections_share_the_file() -> Result<()> {
        let dir = tempdir()?;
        let writer = open_store(dir.path());
        writer.set("shared", &Value::from("w"))?;
        writer.close()?;

        let reader_a = open_store(dir.path());
        let reader_b = open_store(dir.path());
        assert_eq!(reader_a.get("shared")?, Value::from("w"));
        assert_eq!(reader_b.get("shared")?, Value::from("w"));
        reader_a.close()?;
        reader_b.close()
    }
}
