//! Durable local key-value storage over interchangeable engines.
//!
//! `kvfile` persists serialized values under string keys in a directory on
//! disk, backed by either sled's sorted log (cargo feature `sled`, on by
//! default) or a single-table SQLite file. Both engines implement one
//! contract: get, atomic upsert, append-only bulk insert and ordered
//! iteration, so callers stay engine-agnostic. [`KvFile`] binds an engine
//! at construction time; see [`KvStore`] for the contract, including the
//! `set`-vs-`insert` duplicate-key asymmetry.
//!
//! ```no_run
//! use kvfile::{KvFile, Value};
//!
//! # fn main() -> kvfile::Result<()> {
//! let store = KvFile::open()?;
//! store.set("greeting", &Value::from("hello"))?;
//! assert_eq!(store.get("greeting")?, Value::from("hello"));
//! store.close()?;
//! # Ok(())
//! # }
//! ```

// Storage engines and their shared contract
pub mod backend;
// Error taxonomy
pub mod error;
// Pluggable value codec
pub mod serializer;
// The value model stores hold
pub mod value;

#[cfg(feature = "sled")]
pub use backend::SledStore;
pub use backend::{BackendKind, Items, Keys, KvStore, SqliteStore};
pub use error::{Result, StoreError};
pub use serializer::{JsonSerializer, Serializer};
pub use value::Value;

// Foreign types that appear inside `Value`.
pub use bigdecimal::BigDecimal;
pub use chrono::NaiveDateTime;

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

/// Construction parameters for [`KvFile`].
///
/// The defaults mirror [`KvFile::open`]: an anonymous directory, the
/// [`preferred`](BackendKind::preferred) engine and the JSON codec. Each
/// setting can be overridden independently:
///
/// ```no_run
/// use kvfile::{BackendKind, KvFile, StoreOptions};
///
/// # fn main() -> kvfile::Result<()> {
/// let store = KvFile::with_options(
///     StoreOptions::new()
///         .directory("/var/lib/app/cache")
///         .backend(BackendKind::Relational),
/// )?;
/// # store.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StoreOptions<S: Serializer = JsonSerializer> {
    directory: Option<PathBuf>,
    backend: BackendKind,
    serializer: S,
}

impl StoreOptions<JsonSerializer> {
    /// Options carrying the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            directory: None,
            backend: BackendKind::default(),
            serializer: JsonSerializer,
        }
    }
}

impl Default for StoreOptions<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Serializer> StoreOptions<S> {
    /// Keep the store's data in `dir` instead of a throwaway directory.
    /// The directory is created on open when absent, and an existing store
    /// inside it is resumed.
    #[must_use]
    pub fn directory<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.directory = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Bind the store to a specific engine instead of the preferred one.
    #[must_use]
    pub fn backend(mut self, kind: BackendKind) -> Self {
        self.backend = kind;
        self
    }

    /// Replace the value codec.
    #[must_use]
    pub fn serializer<T: Serializer>(self, serializer: T) -> StoreOptions<T> {
        StoreOptions {
            directory: self.directory,
            backend: self.backend,
            serializer,
        }
    }
}

/// A durable key-value store bound to one directory and one engine.
///
/// The engine is chosen when the store is constructed and never re-probed;
/// a handle built with [`open`](Self::open) uses
/// [`BackendKind::preferred`], and [`with_options`](Self::with_options)
/// accepts an explicit choice. Operations forward to the bound engine's
/// [`KvStore`] implementation unchanged.
///
/// A store opened without a directory lives in a temp directory owned by
/// the handle; the data disappears when the handle goes away.
#[derive(Debug)]
pub struct KvFile<S: Serializer = JsonSerializer> {
    inner: Inner<S>,
    // Present only for anonymous stores; dropping it removes the data.
    tempdir: Option<TempDir>,
}

#[derive(Debug)]
enum Inner<S: Serializer> {
    #[cfg(feature = "sled")]
    OrderedLog(SledStore<S>),
    Relational(SqliteStore<S>),
}

impl KvFile<JsonSerializer> {
    /// Open a store in a fresh anonymous directory with the preferred
    /// engine.
    pub fn open() -> Result<Self> {
        Self::with_options(StoreOptions::new())
    }

    /// Open (or resume) a store in `dir` with the preferred engine.
    pub fn open_in<P: AsRef<Path>>(dir: P) -> Result<Self> {
        Self::with_options(StoreOptions::new().directory(dir))
    }
}

impl<S: Serializer> KvFile<S> {
    /// Open a store as described by `options`.
    pub fn with_options(options: StoreOptions<S>) -> Result<Self> {
        let StoreOptions { directory, backend, serializer } = options;
        let (dir, tempdir) = match directory {
            Some(dir) => (dir, None),
            None => {
                let tempdir = TempDir::new()?;
                (tempdir.path().to_path_buf(), Some(tempdir))
            }
        };
        debug!(%backend, dir = %dir.display(), "opening store");
        let inner = match backend {
            #[cfg(feature = "sled")]
            BackendKind::OrderedLog => Inner::OrderedLog(SledStore::open(&dir, serializer)?),
            BackendKind::Relational => Inner::Relational(SqliteStore::open(&dir, serializer)?),
        };
        Ok(Self { inner, tempdir })
    }

    /// Look up `key`. See [`KvStore::get`].
    pub fn get(&self, key: &str) -> Result<Value> {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.get(key),
            Inner::Relational(store) => store.get(key),
        }
    }

    /// Insert or overwrite `key`. See [`KvStore::set`].
    pub fn set(&self, key: &str, value: &Value) -> Result<()> {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.set(key, value),
            Inner::Relational(store) => store.set(key, value),
        }
    }

    /// Bulk-load `pairs` with the bound engine's default batch size: 1000
    /// for the relational engine, 1 for the ordered-log engine. See
    /// [`KvStore::insert`] for the append-only duplicate-key semantics.
    pub fn insert<I>(&self, pairs: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.insert(pairs, SledStore::<S>::DEFAULT_BATCH_SIZE),
            Inner::Relational(store) => store.insert(pairs, SqliteStore::<S>::DEFAULT_BATCH_SIZE),
        }
    }

    /// Bulk-load `pairs`, flushing every `batch_size` records. See
    /// [`KvStore::insert`].
    pub fn insert_batched<I>(&self, pairs: I, batch_size: usize) -> Result<()>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.insert(pairs, batch_size),
            Inner::Relational(store) => store.insert(pairs, batch_size),
        }
    }

    /// All keys in byte order. See [`KvStore::keys`].
    pub fn keys(&self, reverse: bool) -> Result<Keys<'_>> {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.keys(reverse),
            Inner::Relational(store) => store.keys(reverse),
        }
    }

    /// All `(key, value)` pairs in byte order. See [`KvStore::items`].
    pub fn items(&self, reverse: bool) -> Result<Items<'_>> {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.items(reverse),
            Inner::Relational(store) => store.items(reverse),
        }
    }

    /// Engine this store was bound to at construction.
    #[must_use]
    pub fn backend_kind(&self) -> BackendKind {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.kind(),
            Inner::Relational(store) => store.kind(),
        }
    }

    /// Directory holding the store's data.
    #[must_use]
    pub fn path(&self) -> &Path {
        match &self.inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.path(),
            Inner::Relational(store) => store.path(),
        }
    }

    /// Flush and release the engine handle. An anonymous store's directory
    /// is removed here; a removal failure does not fail the close.
    pub fn close(self) -> Result<()> {
        let Self { inner, tempdir } = self;
        let result = match inner {
            #[cfg(feature = "sled")]
            Inner::OrderedLog(store) => store.close(),
            Inner::Relational(store) => store.close(),
        };
        if let Some(tempdir) = tempdir {
            if let Err(e) = tempdir.close() {
                warn!("failed to remove anonymous store directory: {e}");
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_uses_preferred_backend() -> Result<()> {
        let store = KvFile::open()?;
        assert_eq!(store.backend_kind(), BackendKind::preferred());
        store.close()
    }

    #[test]
    fn backend_override_is_honored() -> Result<()> {
        let store = KvFile::with_options(StoreOptions::new().backend(BackendKind::Relational))?;
        assert_eq!(store.backend_kind(), BackendKind::Relational);
        store.set("k", &Value::Int(1))?;
        assert_eq!(store.get("k")?, Value::Int(1));
        store.close()
    }

    #[test]
    fn anonymous_store_cleans_up_on_close() -> Result<()> {
        let store = KvFile::open()?;
        let dir = store.path().to_path_buf();
        store.set("k", &Value::Null)?;
        assert!(dir.exists());
        store.close()?;
        assert!(!dir.exists());
        Ok(())
    }

    #[test]
    fn custom_serializer_flows_through() -> Result<()> {
        // Versioned envelope around the JSON codec, to prove the codec is
        // swappable per store.
        #[derive(Debug)]
        struct Enveloped;

        impl Serializer for Enveloped {
            fn serialize(&self, value: &Value) -> Result<String> {
                Ok(format!("v1:{}", JsonSerializer.serialize(value)?))
            }

            fn deserialize(&self, text: &str) -> Result<Value> {
                let body = text.strip_prefix("v1:").ok_or_else(|| {
                    StoreError::Serialization(format!("missing envelope: {text}"))
                })?;
                JsonSerializer.deserialize(body)
            }
        }

        let store =
            KvFile::with_options(StoreOptions::new().serializer(Enveloped))?;
        store.set("k", &Value::Int(42))?;
        assert_eq!(store.get("k")?, Value::Int(42));
        store.close()
    }
}
