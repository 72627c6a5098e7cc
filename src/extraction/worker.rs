//! Extraction worker loop and per-job processing

use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use super::queue::{ExtractionQueue, QueueInner};
use super::{ExtractionError, JobEvent, JobOutcome};
use crate::db::{bound_text, DocumentRepository, ExtractionJob, JobRepository, MAX_TEXT_LEN};
use crate::error::Result;

/// Process due jobs until shutdown is signalled
///
/// A worker drains the queue, then sleeps until an enqueue wakes it or the
/// poll interval passes. Delayed retries are picked up by the poll.
pub(super) async fn run_worker(
    queue: ExtractionQueue,
    worker_id: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::debug!(worker_id, "Extraction worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        match queue.run_once().await {
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => tracing::error!(worker_id, "Extraction queue error: {}", e),
        }

        let inner = queue.inner();
        tokio::select! {
            _ = inner.notify.notified() => {}
            _ = tokio::time::sleep(inner.poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    tracing::debug!(worker_id, "Extraction worker stopped");
}

/// Run one claimed job and record its outcome on the job row
pub(super) async fn process_job(inner: &QueueInner, job: ExtractionJob) -> Result<JobEvent> {
    let jobs = JobRepository::new(&inner.pool);
    let attempt = u32::try_from(job.attempts).unwrap_or(u32::MAX);

    let outcome = match extract(inner, &job).await {
        Ok(text_id) => {
            tracing::info!(
                job_id = job.id,
                document_id = job.document_id,
                text_id,
                "Extraction completed"
            );
            JobOutcome::Completed { text_id }
        }
        Err(e) if e.is_retryable() && inner.policy.should_retry(attempt) => {
            let delay = inner.policy.delay_for(attempt);
            let available_at = retry_at(Utc::now().timestamp_millis(), delay);
            tracing::warn!(
                job_id = job.id,
                attempt,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Extraction failed, retrying: {}",
                e
            );
            jobs.reschedule(job.id, available_at, &e.to_string()).await?;
            JobOutcome::Retrying { attempt, delay }
        }
        Err(e) => {
            tracing::error!(
                job_id = job.id,
                document_id = job.document_id,
                attempt,
                "Extraction failed: {}",
                e
            );
            let error = e.to_string();
            jobs.fail(job.id, &error).await?;
            JobOutcome::Failed { error }
        }
    };

    Ok(JobEvent {
        job_id: job.id,
        document_id: job.document_id,
        outcome,
    })
}

/// Unix millis at which a job delayed by `delay` becomes due again
fn retry_at(now_ms: i64, delay: Duration) -> i64 {
    now_ms.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX))
}

/// Read the image, OCR it and store the text together with job completion
async fn extract(inner: &QueueInner, job: &ExtractionJob) -> std::result::Result<i64, ExtractionError> {
    let raw = tokio::fs::read(&job.file_path).await?;
    let result = inner.ocr.recognize_image(raw).await?;

    let text = bound_text(&result.text);
    if text.len() < result.text.len() {
        tracing::warn!(
            job_id = job.id,
            "Recognized text longer than {} characters, truncating",
            MAX_TEXT_LEN
        );
    }

    let documents = DocumentRepository::new(&inner.pool);
    let jobs = JobRepository::new(&inner.pool);
    let mut tx = documents.begin().await?;

    let stored = async {
        let row = documents.insert_text_tx(&mut tx, job.document_id, text).await?;
        jobs.complete_tx(&mut tx, job.id).await?;
        Ok::<_, crate::error::AppError>(row)
    }
    .await;

    match stored {
        Ok(row) => {
            tx.commit().await.map_err(crate::error::AppError::from)?;
            Ok(row.id)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::error!(job_id = job.id, "Rollback failed: {}", rollback);
            }
            Err(e.into())
        }
    }
}
