//! Ordered-log backend: sled behind the store contract.
//!
//! sled keeps keys sorted, upserts natively and applies write batches
//! all-or-nothing, so the contract maps straight onto engine calls. Keys and
//! values pass through the shared text adapter on their way in and out;
//! below that boundary everything is bytes.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{text, BackendKind, Items, Keys, KvStore};
use crate::error::{Result, StoreError};
use crate::serializer::{JsonSerializer, Serializer};
use crate::value::Value;

/// Store backed by sled's sorted log.
///
/// Configured for storage workloads:
/// - 64MB page cache
/// - High throughput mode
///
/// The handle holds sled's exclusive directory lock, so a second open of the
/// same directory blocks until this one is closed. `close` flushes before
/// releasing the lock; a later opener sees everything written.
#[derive(Debug)]
pub struct SledStore<S: Serializer = JsonSerializer> {
    db: sled::Db,
    dir: PathBuf,
    serializer: S,
}

impl<S: Serializer> SledStore<S> {
    /// Default flush threshold for [`insert`](KvStore::insert): no batching
    /// unless the caller asks for it.
    pub const DEFAULT_BATCH_SIZE: usize = 1;

    /// Open the store in `dir`, creating it when absent.
    pub fn open<P: AsRef<Path>>(dir: P, serializer: S) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let db = sled::Config::default()
            .path(&dir)
            .cache_capacity(64 * 1024 * 1024)
            .mode(sled::Mode::HighThroughput)
            .open()
            .map_err(|e| {
                StoreError::Backend(format!("failed to open sled at {}: {e}", dir.display()))
            })?;
        debug!(dir = %dir.display(), "opened ordered-log store");
        Ok(Self { db, dir, serializer })
    }

    /// Apply `batch` through sled's atomic write batch and clear it.
    /// Duplicate keys are absorbed by the engine's upsert; the last write
    /// wins.
    fn flush_batch(&self, batch: &mut Vec<(String, String)>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut write = sled::Batch::default();
        for (key, encoded) in batch.iter() {
            write.insert(text::to_bytes(key), text::to_bytes(encoded));
        }
        self.db.apply_batch(write)?;
        debug!(records = batch.len(), "flushed insert batch");
        batch.clear();
        Ok(())
    }

    fn entries(&self, reverse: bool) -> Box<dyn Iterator<Item = sled::Result<(sled::IVec, sled::IVec)>>> {
        let iter = self.db.iter();
        if reverse { Box::new(iter.rev()) } else { Box::new(iter) }
    }
}

impl<S: Serializer> KvStore for SledStore<S> {
    fn get(&self, key: &str) -> Result<Value> {
        match self.db.get(text::to_bytes(key))? {
            Some(bytes) => self.serializer.deserialize(&text::from_bytes(&bytes)?),
            None => Err(StoreError::NotFound(key.to_owned())),
        }
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
        let encoded = self.serializer.serialize(value)?;
        self.db.insert(text::to_bytes(key), text::to_bytes(&encoded))?;
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
            let encoded = self.serializer.serialize(&value)?;
            batch.push((key, encoded));
            if batch.len() >= batch_size {
                self.flush_batch(&mut batch)?;
            }
        }
        self.flush_batch(&mut batch)
    }

    fn keys(&self, reverse: bool) -> Result<Keys<'_>> {
        Ok(Box::new(self.entries(reverse).map(|entry| {
            let (key, _) = entry?;
            text::from_bytes(&key)
        })))
    }

    fn items(&self, reverse: bool) -> Result<Items<'_>> {
        let serializer = &self.serializer;
        Ok(Box::new(self.entries(reverse).map(move |entry| {
            let (key, value) = entry?;
            let key = text::from_bytes(&key)?;
            let value = serializer.deserialize(&text::from_bytes(&value)?)?;
            Ok((key, value))
        })))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::OrderedLog
    }

    fn path(&self) -> &Path {
        &self.dir
    }

    fn close(self) -> Result<()> {
        debug!(dir = %self.dir.display(), "closing ordered-log store");
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    fn open_store(dir: &Path) -> SledStore {
        SledStore::open(dir, JsonSerializer).expect("open store")
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
    fn test_bulk_insert_keeps_last_duplicate() -> Result<()> {
        let dir = tempdir()?;
        let store = open_store(dir.path());
        store.set("k", &Value::Int(1))?;

        // Same key twice in one batch: the engine upserts, last write wins.
        let pairs = vec![
            ("k".to_owned(), Value::Int(2)),
            ("k".to_owned(), Value::Int(3)),
        ];
        store.insert(pairs, 2)?;

        assert_eq!(store.get("k")?, Value::Int(3));
        store.close()
    }

    #[test]
    fn test_native_reverse_iteration() -> Result<()> {
        let dir = tempdir()?;
        let store = open_store(dir.path());
        for key in ["b", "a", "c"] {
            store.set(key, &Value::from(key))?;
        }

        let reversed = store.keys(true)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(reversed, vec!["c", "b", "a"]);
        store.close()
    }
}
