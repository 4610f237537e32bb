//! Transactional key/value storage used for kernel state, the host checkpoint
//! and the mailbox transport, plus filesystem and in-memory backends.

mod digest;
mod fs_store;
mod mem_store;

pub use digest::{DIGEST_PREFIX, digest_bytes, digest_json};
pub use fs_store::FsKvStore;
pub use mem_store::MemKvStore;

use serde::{Serialize, de::DeserializeOwned};
use std::{io, path::PathBuf, sync::Arc};

pub type StoreResult<T> = Result<T, StoreError>;
pub type DynKvStore = Arc<dyn KvStore>;

/// Buffered key/value store. Writes become durable only on `commit`.
///
/// Reads observe pending writes, so a caller sees its own uncommitted state
/// while a block is being executed.
pub trait KvStore: Send + Sync {
    fn has(&self, key: &str) -> StoreResult<bool>;
    fn get(&self, key: &str) -> StoreResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Make every pending write durable as one unit.
    fn commit(&self) -> StoreResult<()>;

    /// Drop pending writes, reverting to the last committed state.
    fn abort(&self) -> StoreResult<()>;

    /// Release the store. Pending writes are discarded.
    fn close(&self) -> StoreResult<()>;
}

/// Decode a JSON value stored under `key`, if present.
pub fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> StoreResult<Option<T>> {
    match store.get(key)? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Decode {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Encode `value` as JSON and stage it under `key`.
pub fn set_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> StoreResult<()> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to decode value at key '{key}': {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("corrupt store: {0}")]
    Corrupt(String),
    #[error("store is closed")]
    Closed,
}

pub(crate) fn io_error(path: impl Into<PathBuf>, err: io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source: err,
    }
}
