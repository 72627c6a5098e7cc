//! Extraction Module
//!
//! Fire-and-forget OCR. The API enqueues a job row and returns; a pool of
//! background workers claims jobs, runs OCR on the stored image and writes
//! one `documents_text` row per successful job.
//!
//! Failures never reach API clients. Transient ones are retried with
//! exponential backoff, permanent ones (missing file, undecodable image,
//! deleted document) fail the job at once. Either way the outcome is only
//! recorded on the job row and broadcast as a [`JobEvent`].

mod queue;
mod retry;
mod worker;

pub use queue::ExtractionQueue;
pub use retry::RetryPolicy;

use std::time::Duration;

use crate::error::AppError;
use crate::ocr::OcrError;

/// Outcome of one processed job
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub job_id: i64,
    pub document_id: i64,
    pub outcome: JobOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// Text stored as `documents_text.id = text_id`
    Completed { text_id: i64 },
    /// Attempt failed, job requeued after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Job abandoned
    Failed { error: String },
}

/// Error raised while processing a single job
#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Failed to read image file: {0}")]
    Io(#[from] std::io::Error),

    #[error("OCR failed: {0}")]
    Ocr(#[from] OcrError),

    #[error("Failed to store text: {0}")]
    Store(#[from] AppError),
}

impl ExtractionError {
    /// Whether the job should be attempted again
    pub fn is_retryable(&self) -> bool {
        match self {
            // The blob is gone or unreadable; retrying reads the same file
            Self::Io(_) => false,
            Self::Ocr(e) => e.is_transient(),
            Self::Store(AppError::Database(e)) => !e
                .as_database_error()
                .map(|db| db.is_foreign_key_violation())
                .unwrap_or(false),
            Self::Store(_) => true,
        }
    }
}
