//! Local filesystem blob store

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

use super::types::{generate_storage_key, is_valid_key, BlobMetadata, DeleteOutcome};
use crate::error::StorageError;

/// Filesystem-backed store for uploaded images
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    max_size: usize,
}

impl BlobStore {
    /// Create a store rooted at `root` accepting payloads up to `max_size` bytes
    pub fn new(root: impl Into<PathBuf>, max_size: usize) -> Self {
        Self {
            root: root.into(),
            max_size,
        }
    }

    /// Create the content directory if needed and pin the root to its
    /// absolute path
    ///
    /// Paths handed out afterwards stay valid if the working directory
    /// changes.
    pub async fn init(&mut self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root).await?;
        self.root = tokio::fs::canonicalize(&self.root).await?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Resolve the on-disk path for a key
    pub fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_valid_key(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Store a payload under a freshly generated key
    pub async fn put(&self, data: &[u8], original_name: &str) -> Result<String, StorageError> {
        if data.len() > self.max_size {
            return Err(StorageError::TooLarge {
                size: data.len(),
                max: self.max_size,
            });
        }

        let key = generate_storage_key(original_name);
        let path = self.path_for(&key)?;

        // create_new: a key is never written twice
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        let written = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            drop(file);
            let _ = tokio::fs::remove_file(&path).await;
            return Err(e.into());
        }

        tracing::debug!(key = %key, size = data.len(), "Stored blob");
        Ok(key)
    }

    /// Delete a blob, reporting whether it existed
    pub async fn delete(&self, key: &str) -> Result<DeleteOutcome, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "Deleted blob");
                Ok(DeleteOutcome::Deleted)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DeleteOutcome::NotFound),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.path_for(key) {
            Ok(path) => tokio::fs::try_exists(path).await.unwrap_or(false),
            Err(_) => false,
        }
    }

    /// List every blob in the content directory
    pub async fn list(&self) -> Result<Vec<BlobMetadata>, StorageError> {
        let mut blobs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(blobs),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(key) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !is_valid_key(&key) {
                continue;
            }
            blobs.push(BlobMetadata {
                key,
                size: metadata.len(),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        Ok(blobs)
    }
}
