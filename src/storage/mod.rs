//! Storage module for uploaded images
//!
//! Blobs live as flat files under a single content directory, keyed by a
//! generated `{uuid}.{ext}` name that doubles as the document name.

mod local;
mod sweep;
mod types;

pub use local::BlobStore;
pub use sweep::sweep_orphans;
pub use types::*;
