//! Storage module for persisting ingestion state
//!
//! This module handles all durable state for the ingestor:
//! - The link registry with its dedup identifiers, discovery order and
//!   fetch-version watermarks
//! - Content-addressed blobs holding raw HTML and extracted text

mod blob;
mod schema;
mod sqlite;
mod traits;

pub use blob::FsBlobStore;
pub use sqlite::SqliteLinkStore;
pub use traits::{BlobStore, LinkStore, StorageError, StorageResult};

use crate::state::FetchVersion;
use chrono::{DateTime, Utc};
use std::fmt;
use std::path::Path;

/// Opens or creates the link store at `path`
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `current_version` - Version of the running extraction logic
pub fn open_link_store(
    path: &Path,
    current_version: FetchVersion,
) -> StorageResult<SqliteLinkStore> {
    SqliteLinkStore::new(path, current_version)
}

/// Represents a link in the registry
#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    /// Assigned on first insertion, strictly increasing
    pub sequence_number: i64,
    pub identifier: String,
    pub domain: String,
    pub url: String,
    pub source_id: Option<String>,
    /// `None` until the link has been claimed for fetching
    pub last_fetch_version: Option<FetchVersion>,
    pub fetched_at: Option<DateTime<Utc>>,
    /// Unix seconds of the first seed job that supplied this link
    pub seed_ingest_timestamp: Option<i64>,
    pub html_handle: Option<BlobHandle>,
    pub text_handle: Option<BlobHandle>,
    /// `None` until a fetch has been recorded
    pub is_paywalled: Option<bool>,
}

/// Opaque reference to a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle(String);

impl BlobHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for BlobHandle {
    fn from(handle: String) -> Self {
        Self(handle)
    }
}

impl fmt::Display for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Aggregate counts over the link registry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub total_links: u64,
    pub domains: u64,
    pub eligible_links: u64,
    pub eligible_domains: u64,
    pub fetched_links: u64,
}
