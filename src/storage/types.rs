//! Storage types

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Longest extension carried over from the uploaded file name
pub const MAX_EXTENSION_LEN: usize = 16;

/// Metadata about a stored blob
#[derive(Debug, Clone, Serialize)]
pub struct BlobMetadata {
    pub key: String,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Result of a delete request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// Generate a unique storage key for an uploaded file
///
/// The key is a random UUID followed by the original extension, if it has a
/// usable one. Content is never deduplicated.
pub fn generate_storage_key(original_name: &str) -> String {
    let id = Uuid::new_v4();
    match file_extension(original_name) {
        Some(ext) => format!("{}.{}", id, ext),
        None => id.to_string(),
    }
}

/// Extract a safe, lower-cased extension from a file name
fn file_extension(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty()
        || ext.is_empty()
        || ext.len() > MAX_EXTENSION_LEN
        || !ext.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Check that a key names a single file inside the content directory
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
}
