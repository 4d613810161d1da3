use crate::state::FetchVersion;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Babble-Ingest
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub parser: ParserConfig,
    pub fetcher: FetcherConfig,
    pub storage: StorageConfig,
}

/// Domain scheduler behavior
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Minimum time between two fetches to the same domain (seconds)
    #[serde(rename = "cooldown-secs", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// How often the rotation is re-seeded from the link store (seconds)
    #[serde(rename = "refresh-period-secs", default = "default_refresh_period_secs")]
    pub refresh_period_secs: u64,

    /// How long a worker backs off after a storage failure (seconds)
    #[serde(rename = "error-backoff-secs", default = "default_error_backoff_secs")]
    pub error_backoff_secs: u64,

    /// Give a claimed link back to the queue when its fetch fails
    #[serde(rename = "release-claim-on-fetch-error", default)]
    pub release_claim_on_fetch_error: bool,
}

impl SchedulerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::from_secs(self.refresh_period_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: default_cooldown_secs(),
            refresh_period_secs: default_refresh_period_secs(),
            error_backoff_secs: default_error_backoff_secs(),
            release_claim_on_fetch_error: false,
        }
    }
}

/// Ingestion worker pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Number of concurrent ingestion workers
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Version tag of the current extraction logic
    #[serde(rename = "fetch-version", default = "default_fetch_version")]
    pub fetch_version: i64,
}

impl IngestConfig {
    pub fn fetch_version(&self) -> FetchVersion {
        FetchVersion::new(self.fetch_version)
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            fetch_version: default_fetch_version(),
        }
    }
}

/// What to do with domain-relative hrefs such as `/path` or `./path`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelativeLinkPolicy {
    /// Resolve against the page the link was found on
    #[default]
    Resolve,
    /// Discard the link
    Drop,
}

/// Document parser configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParserConfig {
    #[serde(rename = "relative-links", default)]
    pub relative_links: RelativeLinkPolicy,

    /// CSS classes whose presence marks a page as paywalled
    #[serde(rename = "paywall-classes", default)]
    pub paywall_classes: Vec<String>,
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,

    /// Per-request timeout (seconds)
    #[serde(rename = "timeout-secs", default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Refuse plain-HTTP URLs
    #[serde(rename = "https-only", default)]
    pub https_only: bool,
}

impl FetcherConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite link database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory holding raw HTML and body text blobs
    #[serde(rename = "blob-dir")]
    pub blob_dir: String,
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_refresh_period_secs() -> u64 {
    60 * 60
}

fn default_error_backoff_secs() -> u64 {
    120
}

fn default_workers() -> u32 {
    5
}

fn default_fetch_version() -> i64 {
    FetchVersion::CURRENT.get()
}

fn default_timeout_secs() -> u64 {
    30
}
