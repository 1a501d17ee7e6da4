// SPDX-License-Identifier: Apache-2.0

//! The checkpoint `Storage` interface (§6), used by incremental receivers to
//! persist the last observed tracking-column value and by stateful
//! processors that need to survive a restart.
//!
//! `set` is documented as at-least-once durable before the caller may treat
//! a checkpoint as committed; the file-backed implementation here satisfies
//! that by `fsync`-ing the replacement file before the atomic rename.

mod file;

pub use file::FileStorage;

use async_trait::async_trait;

/// Errors raised by a [`Storage`] backend.
#[derive(thiserror::Error, Debug)]
pub enum StorageError {
    /// An I/O error occurred reading or writing the backing store.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The stored value could not be (de)serialized.
    #[error("storage (de)serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A pluggable key/value checkpoint store (§6).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Reads the value for `key`, if present.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Durably persists `value` under `key`. Returning `Ok` is a commitment
    /// that the value is at-least-once durable.
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removes `key`, if present.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Convenience helpers built on top of [`Storage`] for numeric checkpoints,
/// the common case for incremental collection (§4.2): a statement digest's
/// cumulative counter or a log record's event id.
#[async_trait]
pub trait CheckpointExt: Storage {
    /// Reads a `u64` checkpoint, defaulting to `None` if absent or
    /// unparsable (treated the same as absent per §4.2's warm-start rule).
    async fn get_checkpoint(&self, key: &str) -> Option<u64> {
        self.get(key).await.ok().flatten().and_then(|v| v.parse().ok())
    }

    /// Persists a `u64` checkpoint.
    async fn set_checkpoint(&self, key: &str, value: u64) -> Result<(), StorageError> {
        self.set(key, &value.to_string()).await
    }
}

impl<T: Storage + ?Sized> CheckpointExt for T {}
