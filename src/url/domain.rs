use std::net::IpAddr;

/// Splits a lowercase hostname into its subdomain and registrable domain
///
/// `blog.elpais.com` becomes `(Some("blog"), "elpais.com")` and
/// `www.clarin.com.ar` becomes `(Some("www"), "clarin.com.ar")`. IP addresses
/// and single-label hosts come back whole with no subdomain.
///
/// # Examples
///
/// ```
/// use babble_ingest::url::split_host;
///
/// assert_eq!(split_host("deportes.elpais.com"), (Some("deportes"), "elpais.com"));
/// ```
pub fn split_host(host: &str) -> (Option<&str>, &str) {
    let host = host.trim_end_matches('.');
    if is_ip(host) {
        return (None, host);
    }

    let domain = registrable_part(host);
    if domain.len() == host.len() {
        return (None, domain);
    }
    let subdomain = &host[..host.len() - domain.len() - 1];
    (Some(subdomain), domain)
}

fn is_ip(host: &str) -> bool {
    host.starts_with('[') || host.parse::<IpAddr>().is_ok()
}

/// Registrable domain (eTLD+1) from the public suffix list
///
/// Hosts that are themselves a public suffix, and single-label hosts such as
/// `localhost`, have no registrable part and come back whole.
fn registrable_part(host: &str) -> &str {
    match psl::domain(host.as_bytes()) {
        Some(domain) => host
            .get(host.len() - domain.as_bytes().len()..)
            .unwrap_or(host),
        None => host,
    }
}
