// SPDX-License-Identifier: Apache-2.0

//! A file-backed [`Storage`] implementation: one JSON object per namespace
//! directory, written via a temp-file-then-rename so a crash mid-write never
//! leaves a torn checkpoint file behind.

use crate::{Storage, StorageError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Stores all keys for one collector instance in a single JSON file,
/// guarded by an in-process mutex. Adequate for the checkpoint volumes this
/// collector produces (one entry per tracked query/log stream).
pub struct FileStorage {
    path: PathBuf,
    state: Arc<Mutex<HashMap<String, String>>>,
}

impl FileStorage {
    /// Opens (or creates) the checkpoint file at `path`, loading any
    /// existing entries synchronously at startup.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let bytes = tokio::fs::read(&path).await?;
            if bytes.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            HashMap::new()
        };
        Ok(Self {
            path,
            state: Arc::new(Mutex::new(state)),
        })
    }

    async fn flush(&self, state: &HashMap<String, String>) -> Result<(), StorageError> {
        let serialized = serde_json::to_vec(state)?;
        let tmp_path = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(&tmp_path).await?;
        use tokio::io::AsyncWriteExt;
        file.write_all(&serialized).await?;
        file.sync_all().await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.lock().await;
        Ok(state.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let _ = state.insert(key.to_string(), value.to_string());
        self.flush(&state).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        let _ = state.remove(key);
        self.flush(&state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CheckpointExt;

    #[tokio::test]
    async fn round_trips_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let storage = FileStorage::open(&path).await.unwrap();
        storage.set_checkpoint("pg_stat_statements:digest123", 4200).await.unwrap();
        assert_eq!(
            storage.get_checkpoint("pg_stat_statements:digest123").await,
            Some(4200)
        );

        // Reopen to verify durability across a restart.
        let reopened = FileStorage::open(&path).await.unwrap();
        assert_eq!(
            reopened.get_checkpoint("pg_stat_statements:digest123").await,
            Some(4200)
        );
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("c.json")).await.unwrap();
        assert_eq!(storage.get("absent").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path().join("c.json")).await.unwrap();
        storage.set("k", "v").await.unwrap();
        storage.delete("k").await.unwrap();
        assert_eq!(storage.get("k").await.unwrap(), None);
    }
}
