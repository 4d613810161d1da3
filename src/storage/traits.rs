//! Storage traits and error types
//!
//! This module defines the trait interfaces for the link store and blob
//! storage backends, and the associated error types.

use crate::state::FetchVersion;
use crate::storage::{BlobHandle, Link, LinkStats};
use crate::url::NormalizedUrl;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Invalid blob handle: {0}")]
    InvalidHandle(String),

    #[error("Invalid blob kind: {0}")]
    InvalidKind(String),

    #[error("Link not found: {0}")]
    LinkNotFound(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable registry of discovered links
///
/// Links are deduplicated by identifier, ordered by the sequence number they
/// were assigned on first insertion, and carry a fetch-version watermark.
/// A link is eligible for fetching while its watermark is null or older than
/// the version the store was opened with.
pub trait LinkStore: Send {
    // ===== Discovery =====

    /// Bulk-inserts links, ignoring identifiers that already exist
    ///
    /// Returns the number of links that were actually new.
    fn insert_links(&mut self, urls: &[NormalizedUrl]) -> StorageResult<usize>;

    /// Inserts links from a seed job, or makes existing ones eligible again
    ///
    /// On an identifier conflict the fetch watermark is cleared. The seed
    /// ingest timestamp is only ever written here and keeps its first value.
    fn upsert_seed_links(
        &mut self,
        urls: &[NormalizedUrl],
        source_id: Option<&str>,
        seed_ingest_timestamp: Option<i64>,
    ) -> StorageResult<()>;

    // ===== Scheduling =====

    /// Distinct domains with at least one eligible link
    fn get_domains_with_unfetched_links(&self) -> StorageResult<Vec<String>>;

    /// The eligible link with the lowest sequence number for a domain
    fn get_unfetched_link_for_domain(&self, domain: &str) -> StorageResult<Option<Link>>;

    /// Advances a link's watermark to `version`; never moves it backwards
    fn set_url_as_fetched(&mut self, identifier: &str, version: FetchVersion)
        -> StorageResult<()>;

    /// Selects the oldest eligible link for a domain and marks it fetched
    ///
    /// Both steps must happen in one transaction so that no two callers can
    /// ever claim the same link.
    fn claim_unfetched_link_for_domain(&mut self, domain: &str) -> StorageResult<Option<Link>>;

    /// Puts a claimed link's watermark back to what it was before the claim
    fn restore_fetch_version(
        &mut self,
        identifier: &str,
        previous: Option<FetchVersion>,
    ) -> StorageResult<()>;

    // ===== Fetch bookkeeping =====

    /// Records a successful fetch, where its content was stored, and whether
    /// the page was paywalled
    fn record_fetch_success(
        &mut self,
        identifier: &str,
        fetched_at: DateTime<Utc>,
        html: &BlobHandle,
        text: &BlobHandle,
        is_paywalled: bool,
    ) -> StorageResult<()>;

    /// Looks a link up by identifier
    fn get_link(&self, identifier: &str) -> StorageResult<Option<Link>>;

    /// Aggregate counts for operators
    fn stats(&self) -> StorageResult<LinkStats>;
}

/// Content-addressed storage for raw HTML and extracted text
pub trait BlobStore: Send + Sync {
    /// Stores `content` under the given kind and returns its handle
    fn write(&self, kind: &str, content: &[u8]) -> StorageResult<BlobHandle>;

    /// Reads back the content behind a handle
    fn read(&self, handle: &BlobHandle) -> StorageResult<Vec<u8>>;
}
