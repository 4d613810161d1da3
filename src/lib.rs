//! Babble-Ingest: content acquisition for a foreign-language news crawler
//!
//! This crate discovers links on news sites, schedules their retrieval under
//! per-domain politeness cooldowns, fetches and parses the pages, and feeds the
//! newly discovered links back into a durable link store. Pages are reprocessed
//! whenever the extraction logic's fetch version moves forward.

pub mod config;
pub mod crawler;
pub mod state;
pub mod storage;
pub mod url;

use thiserror::Error;

/// Main error type for Babble-Ingest operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Parse error: {0}")]
    Parse(#[from] crawler::ParseError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Scheduler lock poisoned")]
    LockPoisoned,
}

impl IngestError {
    /// Returns true for failures that only affect the link being processed
    pub fn is_link_local(&self) -> bool {
        matches!(self, Self::Url(_) | Self::Fetch(_) | Self::Parse(_))
    }
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL normalization errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,

    #[error("Malformed URL: {0}")]
    Malformed(String),
}

/// Result type alias for Babble-Ingest operations
pub type Result<T> = std::result::Result<T, IngestError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{DomainScheduler, Ingestor, LinkLease, ParsedDocument};
pub use state::FetchVersion;
pub use storage::{BlobStore, FsBlobStore, Link, LinkStore, SqliteLinkStore};
pub use url::{normalize, NormalizedUrl};
