use crate::url::domain::split_host;
use crate::UrlError;
use url::{ParseError, Url};

/// List of tracking query parameters to remove during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "ref",
    "source",
];

/// A discovered URL reduced to its canonical parts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedUrl {
    /// Dedup key, stable 1:1 with the canonical URL's host and path
    pub identifier: String,

    /// Registrable domain, the unit of politeness scheduling
    pub domain: String,

    /// Canonical absolute URL
    pub url: String,
}

/// Normalizes a raw href or URL into its identifier, domain and canonical URL
///
/// # Normalization Steps
///
/// 1. Parse the URL; scheme-less input such as `www.example.com/page` is read as HTTPS
/// 2. Reject anything that is not HTTP or HTTPS
/// 3. Lowercase the host and remove a `www.` prefix
/// 4. Normalize the path: drop dot segments, duplicate slashes and trailing slash
/// 5. Remove the fragment
/// 6. Remove tracking query parameters and sort the rest
/// 7. Derive the identifier as `[subdomain|]domain[:port][|path]`
///
/// The identifier deliberately ignores the query string, so two URLs that
/// differ only in query parameters are the same link.
///
/// # Examples
///
/// ```
/// use babble_ingest::url::normalize;
///
/// let parsed = normalize("http://WWW.Blog.Example.COM/page/?utm_source=x").unwrap();
/// assert_eq!(parsed.url, "http://blog.example.com/page");
/// assert_eq!(parsed.domain, "example.com");
/// assert_eq!(parsed.identifier, "blog|example.com|page");
/// ```
pub fn normalize(raw: &str) -> Result<NormalizedUrl, UrlError> {
    let url = normalize_url(raw)?;
    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_string();
    let (subdomain, domain) = split_host(&host);

    let mut parts: Vec<String> = Vec::with_capacity(3);
    if let Some(subdomain) = subdomain {
        parts.push(subdomain.to_string());
    }
    match url.port() {
        Some(port) => parts.push(format!("{}:{}", domain, port)),
        None => parts.push(domain.to_string()),
    }
    let page = url.path().trim_matches('/');
    if !page.is_empty() {
        parts.push(page.to_string());
    }

    Ok(NormalizedUrl {
        identifier: parts.join("|"),
        domain: domain.to_string(),
        url: url.to_string(),
    })
}

/// Normalizes a URL string into a canonical [`Url`]
///
/// # Examples
///
/// ```
/// use babble_ingest::url::normalize_url;
///
/// let url = normalize_url("https://WWW.EXAMPLE.COM/page/").unwrap();
/// assert_eq!(url.as_str(), "https://example.com/page");
/// ```
pub fn normalize_url(url_str: &str) -> Result<Url, UrlError> {
    let trimmed = url_str.trim();
    let mut url = match Url::parse(trimmed) {
        Ok(url) => url,
        Err(ParseError::RelativeUrlWithoutBase) => Url::parse(&format!("https://{}", trimmed))
            .map_err(|e| UrlError::Parse(e.to_string()))?,
        Err(e) => return Err(UrlError::Parse(e.to_string())),
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    let host = url.host_str().ok_or(UrlError::MissingDomain)?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host).to_string();
    if host.is_empty() {
        return Err(UrlError::MissingDomain);
    }
    url.set_host(Some(&host))
        .map_err(|e| UrlError::Malformed(format!("Failed to set host: {}", e)))?;

    let normalized_path = normalize_path(url.path());
    url.set_path(&normalized_path);

    url.set_fragment(None);

    if url.query().is_some() {
        let filtered_params = filter_and_sort_query_params(&url);
        if filtered_params.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut()
                .clear()
                .extend_pairs(filtered_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        }
    }

    Ok(url)
}

/// Normalizes a URL path by removing dot segments and trailing slashes
fn normalize_path(path: &str) -> String {
    let mut normalized_segments: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                normalized_segments.pop();
            }
            _ => normalized_segments.push(segment),
        }
    }

    if normalized_segments.is_empty() {
        return "/".to_string();
    }

    format!("/{}", normalized_segments.join("/"))
}

/// Filters out tracking parameters and sorts remaining query parameters
fn filter_and_sort_query_params(url: &Url) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    params.sort();
    params
}

fn is_tracking_param(key: &str) -> bool {
    TRACKING_PARAMS.contains(&key) || key.starts_with("utm_")
}
