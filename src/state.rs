//! Application state management

use std::sync::Arc;

use sqlx::SqlitePool;

use crate::config::Config;
use crate::db::drop_schema;
use crate::error::Result;
use crate::extraction::ExtractionQueue;
use crate::ocr::OcrService;
use crate::storage::BlobStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    db: SqlitePool,
    blobs: BlobStore,
    extraction: ExtractionQueue,
}

impl AppState {
    /// Create the application state
    ///
    /// Creates the blob directory and starts the extraction workers.
    pub async fn new(config: Config, db: SqlitePool, ocr: Arc<OcrService>) -> Result<Self> {
        let mut blobs = BlobStore::new(&config.storage.root, config.storage.max_upload_bytes);
        blobs.init().await?;

        let extraction = ExtractionQueue::new(db.clone(), ocr, &config.worker);
        extraction.start(config.worker.concurrency).await?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                db,
                blobs,
                extraction,
            }),
        })
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the database pool
    pub fn db(&self) -> &SqlitePool {
        &self.inner.db
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.inner.blobs
    }

    pub fn extraction(&self) -> &ExtractionQueue {
        &self.inner.extraction
    }

    /// Stop workers and release the database
    ///
    /// Tables are dropped first when `database.drop_on_shutdown` is set.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Shutting down application state...");
        self.inner.extraction.shutdown().await;

        if self.inner.config.database.drop_on_shutdown {
            tracing::warn!("Dropping database tables on shutdown");
            drop_schema(&self.inner.db).await?;
        }

        self.inner.db.close().await;
        Ok(())
    }
}
