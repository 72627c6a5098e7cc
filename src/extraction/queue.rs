//! Extraction queue handle
//!
//! Owns the worker pool and the shared pieces every worker needs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, watch, Mutex, Notify};
use tokio::task::JoinHandle;

use super::retry::RetryPolicy;
use super::worker::{process_job, run_worker};
use super::JobEvent;
use crate::config::WorkerConfig;
use crate::db::{ExtractionJob, JobRepository};
use crate::error::Result;
use crate::ocr::OcrService;

/// Buffered events per subscriber before old ones are dropped
const EVENT_CAPACITY: usize = 256;

/// Handle to the extraction job queue and its workers
#[derive(Clone)]
pub struct ExtractionQueue {
    inner: Arc<QueueInner>,
}

pub(super) struct QueueInner {
    pub pool: SqlitePool,
    pub ocr: Arc<OcrService>,
    pub policy: RetryPolicy,
    pub poll_interval: Duration,
    /// How long a claimed job is held before another worker may take it
    pub lease_ms: u64,
    /// Wakes an idle worker after an enqueue
    pub notify: Notify,
    pub events: broadcast::Sender<JobEvent>,
    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExtractionQueue {
    /// Create a queue; no worker runs until [`start`](Self::start)
    pub fn new(pool: SqlitePool, ocr: Arc<OcrService>, config: &WorkerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(QueueInner {
                pool,
                ocr,
                policy: RetryPolicy::from(config),
                poll_interval: Duration::from_millis(config.poll_interval_ms.max(1)),
                lease_ms: config.lease_ms,
                notify: Notify::new(),
                events,
                shutdown,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub(super) fn inner(&self) -> &QueueInner {
        &self.inner
    }

    /// Requeue stranded jobs and spawn `concurrency` workers
    pub async fn start(&self, concurrency: usize) -> Result<()> {
        let recovered = JobRepository::new(&self.inner.pool).recover_running().await?;
        if recovered > 0 {
            tracing::warn!(recovered, "Requeued extraction jobs left running by a previous process");
        }

        let mut workers = self.inner.workers.lock().await;
        for worker_id in 0..concurrency.max(1) {
            let queue = self.clone();
            let shutdown = self.inner.shutdown.subscribe();
            workers.push(tokio::spawn(run_worker(queue, worker_id, shutdown)));
        }

        tracing::info!(workers = workers.len(), "Extraction workers started");
        Ok(())
    }

    /// Queue a job and return without waiting for it
    pub async fn enqueue(&self, document_id: i64, file_path: &Path) -> Result<ExtractionJob> {
        let job = JobRepository::new(&self.inner.pool)
            .enqueue(document_id, &file_path.to_string_lossy())
            .await?;

        tracing::info!(job_id = job.id, document_id, "Extraction job queued");
        self.inner.notify.notify_one();

        Ok(job)
    }

    /// Receive an event for every job a worker finishes processing
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Claim and process one due job, if any
    ///
    /// If the outcome cannot be recorded the error is returned and the job
    /// stays `running` until its lease expires, after which it is claimed
    /// again.
    pub async fn run_once(&self) -> Result<Option<JobEvent>> {
        let now_ms = Utc::now().timestamp_millis();
        let Some(job) = JobRepository::new(&self.inner.pool)
            .claim_next(now_ms, self.inner.lease_ms)
            .await?
        else {
            return Ok(None);
        };

        let event = process_job(self.inner(), job).await?;
        let _ = self.inner.events.send(event.clone());

        Ok(Some(event))
    }

    /// Stop all workers and wait for in-flight jobs to finish
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown.send(true);

        let workers: Vec<JoinHandle<()>> = self.inner.workers.lock().await.drain(..).collect();
        for handle in workers {
            if let Err(e) = handle.await {
                tracing::error!("Extraction worker panicked: {}", e);
            }
        }

        tracing::info!("Extraction workers stopped");
    }
}
