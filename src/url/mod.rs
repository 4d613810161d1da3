//! URL handling module for Babble-Ingest
//!
//! This module turns raw hrefs into canonical URLs, derives the dedup
//! identifier used by the link store, and extracts the registrable domain
//! that politeness scheduling is keyed on.

mod domain;
mod normalize;

pub use domain::split_host;
pub use normalize::{normalize, normalize_url, NormalizedUrl};

use tracing::debug;

/// Normalizes a batch of raw URLs, silently dropping the ones that fail
///
/// Normalization failures are not retried; the offending href is logged at
/// debug level and skipped.
pub fn normalize_all<'a, I>(raw_urls: I) -> Vec<NormalizedUrl>
where
    I: IntoIterator<Item = &'a str>,
{
    raw_urls
        .into_iter()
        .filter_map(|raw| match normalize(raw) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                debug!("Dropping URL {}: {}", raw, e);
                None
            }
        })
        .collect()
}
