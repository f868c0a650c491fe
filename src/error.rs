//! Error types shared by every store operation.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by stores and serializers.
///
/// Every failure is reported to the immediate caller on the operation that
/// hit it; nothing in the crate retries or falls back. An engine that is not
/// compiled in is not an error at all, it simply never becomes a
/// [`BackendKind`](crate::BackendKind) variant.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `get` was called with a key the store does not contain.
    #[error("key not found: {0}")]
    NotFound(String),

    /// The codec rejected a value or could not decode stored text.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The underlying engine failed: I/O, corruption, constraint violation.
    #[error("backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

#[cfg(feature = "sled")]
impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        Self::Backend(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
