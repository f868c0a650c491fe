//! Storage backends and the contract they share.
//!
//! Two engines sit behind one [`KvStore`] contract: a single-table SQLite
//! file ([`SqliteStore`]) and sled's sorted log ([`SledStore`], cargo feature
//! `sled`). Callers usually reach them through [`KvFile`](crate::KvFile),
//! which binds one engine at construction time and never re-probes.
//!
//! # Design
//!
//! - **Text-level contract**: keys are `&str`, values are [`Value`]s; what
//!   actually lands in an engine is the codec's text output
//! - **Sync operations**: every method blocks until the engine reports
//!   completion, and nothing retries
//! - **Owned handles**: a store owns its engine handle; `close` consumes the
//!   store, and live iterators borrow it until dropped
//!
//! # Implementations
//!
//! - [`SqliteStore`]: one table in one file, always compiled in
//! - [`SledStore`]: native ordered engine, preferred when compiled in

pub mod sqlite_backend;

#[cfg(feature = "sled")]
pub mod sled_backend;


use std::fmt;
use std::path::Path;

use crate::error::Result;
use crate::value::Value;

#[cfg(feature = "sled")]
pub use sled_backend::SledStore;
pub use sqlite_backend::SqliteStore;

/// Iterator over keys, as produced by [`KvStore::keys`].
pub type Keys<'a> = Box<dyn Iterator<Item = Result<String>> + 'a>;

/// Iterator over `(key, value)` pairs, as produced by [`KvStore::items`].
pub type Items<'a> = Box<dyn Iterator<Item = Result<(String, Value)>> + 'a>;

/// The engines a store can be bound to.
///
/// Selection happens once, at construction, through
/// [`StoreOptions::backend`](crate::StoreOptions::backend) or the
/// [`preferred`](Self::preferred) policy. Two handles bound to different
/// kinds never share data even when pointed at the same directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// sled's sorted log-structured engine.
    #[cfg(feature = "sled")]
    OrderedLog,
    /// Single-file SQLite table. Always available.
    Relational,
}

impl BackendKind {
    /// Selection policy: the ordered-log engine when compiled in, the
    /// relational engine otherwise.
    #[must_use]
    pub const fn preferred() -> Self {
        #[cfg(feature = "sled")]
        {
            Self::OrderedLog
        }
        #[cfg(not(feature = "sled"))]
        {
            Self::Relational
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::preferred()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "sled")]
            Self::OrderedLog => f.write_str("ordered-log"),
            Self::Relational => f.write_str("relational"),
        }
    }
}

/// Contract every backend implements.
///
/// Both engines expose the same operations with the same semantics; the
/// differences that remain (commit granularity, duplicate handling on the
/// bulk path) are called out on the methods below.
pub trait KvStore {
    /// Look up `key` and decode its value.
    ///
    /// # Returns
    /// - `Ok(value)`: key present
    /// - `Err(StoreError::NotFound)`: key absent
    /// - `Err(_)`: engine or codec failure
    fn get(&self, key: &str) -> Result<Value>;

    /// Insert or overwrite `key` in one atomic write.
    ///
    /// Durable when the call returns: the relational engine commits a single
    /// upsert statement, the ordered-log engine applies its native upsert.
    fn set(&self, key: &str, value: &Value) -> Result<()>;

    /// Bulk-load `pairs`, flushing every `batch_size` records.
    ///
    /// With `batch_size == 1` this is exactly repeated [`set`](Self::set)
    /// calls, overwrites included. Any other size buffers records and
    /// appends each full batch in one atomic write **without checking for
    /// existing keys**: the batched path is for fresh keys only. A pair
    /// whose key already exists is a backend-defined conflict, where the
    /// relational engine rejects the whole flush with
    /// [`StoreError::Backend`](crate::StoreError::Backend) and the
    /// ordered-log engine silently keeps the last write. Use
    /// [`set`](Self::set) to update.
    ///
    /// A `batch_size` of zero flushes every record immediately, one atomic
    /// write per pair, still without the existence check.
    ///
    /// A failure mid-stream leaves earlier flushed batches committed and
    /// the rest of the input unapplied.
    fn insert<I>(&self, pairs: I, batch_size: usize) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>;

    /// All keys in lexicographic byte order, ascending unless `reverse`.
    ///
    /// Every call opens a fresh cursor over committed state, so iteration
    /// can be restarted by calling again. The iterator borrows the store
    /// until dropped.
    fn keys(&self, reverse: bool) -> Result<Keys<'_>>;

    /// Like [`keys`](Self::keys), paired with each decoded value.
    fn items(&self, reverse: bool) -> Result<Items<'_>>;

    /// Which engine this store is bound to.
    fn kind(&self) -> BackendKind;

    /// Directory holding the store's data.
    fn path(&self) -> &Path;

    /// Flush and release the engine handle.
    ///
    /// Taking `self` by value means a closed store cannot be touched again
    /// and any live iterator must be dropped first.
    fn close(self) -> Result<()>;
}

/// Single conversion point between store text and engine bytes.
///
/// Byte-oriented engines route every key and value through here, in both
/// directions; nothing else in the crate converts between the two.
#[cfg(feature = "sled")]
pub(crate) mod text {
    use crate::error::{Result, StoreError};

    pub(crate) fn to_bytes(text: &str) -> &[u8] {
        text.as_bytes()
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<String> {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|e| StoreError::Backend(format!("stored data is not utf-8: {e}")))
    }
}
