//! Orphaned blob cleanup
//!
//! Upload writes the blob before the document row. If the row never commits
//! the compensation path deletes the blob, but a crash in between leaves a
//! file no document points to. The sweep removes those once they are older
//! than a grace period, so in-flight uploads are never touched.

use chrono::{Duration, Utc};
use sqlx::SqlitePool;

use super::local::BlobStore;
use super::types::DeleteOutcome;
use crate::db::DocumentRepository;
use crate::error::Result;

/// Delete blobs without a document row that are older than `grace`
///
/// Returns the number of blobs removed.
pub async fn sweep_orphans(pool: &SqlitePool, store: &BlobStore, grace: Duration) -> Result<usize> {
    let blobs = store.list().await?;
    if blobs.is_empty() {
        return Ok(0);
    }

    let known = DocumentRepository::new(pool).names().await?;
    let cutoff = Utc::now() - grace;
    let mut removed = 0;

    for blob in blobs {
        if known.contains(&blob.key) {
            continue;
        }
        // Unknown age counts as fresh
        let old_enough = blob.modified.map(|m| m < cutoff).unwrap_or(false);
        if !old_enough {
            continue;
        }

        match store.delete(&blob.key).await {
            Ok(DeleteOutcome::Deleted) => {
                tracing::info!(key = %blob.key, size = blob.size, "Removed orphaned blob");
                removed += 1;
            }
            Ok(DeleteOutcome::NotFound) => {}
            Err(e) => tracing::warn!(key = %blob.key, "Failed to remove orphaned blob: {}", e),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::test_pool;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sweep_removes_only_old_orphans() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let mut store = BlobStore::new(temp_dir.path().join("documents"), 1024);
        store.init().await.unwrap();

        let referenced = store.put(b"kept", "kept.png").await.unwrap();
        let orphan = store.put(b"lost", "lost.png").await.unwrap();

        let repo = DocumentRepository::new(&pool);
        let mut tx = repo.begin().await.unwrap();
        repo.create_tx(&mut tx, &referenced, Utc::now()).await.unwrap();
        tx.commit().await.unwrap();

        // Within the grace period nothing is removed
        let removed = sweep_orphans(&pool, &store, Duration::hours(1)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(store.exists(&orphan).await);

        // A negative grace puts the cutoff in the future
        let removed = sweep_orphans(&pool, &store, Duration::hours(-1)).await.unwrap();
        assert_eq!(removed, 1);
        assert!(!store.exists(&orphan).await);
        assert!(store.exists(&referenced).await);
    }

    #[tokio::test]
    async fn test_sweep_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let pool = test_pool(&temp_dir).await;
        let store = BlobStore::new(temp_dir.path().join("documents"), 1024);

        assert_eq!(sweep_orphans(&pool, &store, Duration::zero()).await.unwrap(), 0);
    }
}
