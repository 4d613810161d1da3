//! Crawler module for link scheduling, fetching and document processing
//!
//! This module contains the core ingestion logic, including:
//! - Per-domain politeness scheduling and link claiming
//! - HTTP fetching of raw page bytes
//! - HTML decoding and extraction of text, links and metadata
//! - The orchestrator cycle and its worker pool

mod fetcher;
mod ingestor;
mod parser;
mod scheduler;

pub use fetcher::{build_http_client, FetchError, FetchedPage, Fetcher};
pub use ingestor::{run_ingest, run_ingest_until, run_refresh, CycleOutcome, Ingestor};
pub use parser::{decode_body, parse_document, parse_html, ParseError, ParseOptions, ParsedDocument};
pub use scheduler::{DomainScheduler, LinkLease};
