//! HTML parser for extracting body text, links and metadata
//!
//! This module handles turning one fetched document into:
//! - Body text gathered from a fixed set of text-bearing tags
//! - Links to feed back into the scheduler (from `<a href>`)
//! - `<meta>` name/property → content pairs
//! - The document language from `<html lang>`
//! - Whether the page declares itself paywalled
//!
//! Parsing is a pure function of the input bytes and never performs I/O.

use crate::config::RelativeLinkPolicy;
use encoding_rs::{Encoding, UTF_8};
use scraper::node::{Element, Node};
use scraper::{ElementRef, Html};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Tags whose text content counts as body text
const TEXT_TAGS: &[&str] = &[
    "a", "abbr", "address", "b", "center", "h1", "h2", "h3", "h4", "h5", "h6", "li", "p", "span",
    "strong", "td",
];

/// Link targets that are static assets rather than pages
const ASSET_EXTENSIONS: &[&str] = &[".jpeg", ".jpg", ".gif", ".png"];

/// Errors that can occur while parsing a document
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Document is not decodable as {charset}")]
    Undecodable { charset: String },
}

/// Options controlling link extraction
#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    /// How to treat hrefs that are not absolute URLs
    pub relative_links: RelativeLinkPolicy,

    /// URL the document was fetched from; relative hrefs resolve against it
    pub base_url: Option<Url>,

    /// CSS classes that mark an element as a paywall overlay
    pub paywall_classes: Vec<String>,
}

/// Everything extracted from one HTML document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedDocument {
    /// Text nodes from text-bearing tags, one per line
    ///
    /// Each text node is trimmed and whitespace-only nodes are skipped, so
    /// the line count can be lower than the number of text nodes.
    pub body_text: String,

    /// Filtered links in document order
    ///
    /// These are absolute URLs serialized by [`Url`], not the raw href text:
    /// relative hrefs are resolved and the serializer normalizes the rest,
    /// so `https://x.com` comes back as `https://x.com/`.
    pub links: Vec<String>,

    /// `<meta>` key/value pairs; later duplicates win
    pub metadata: HashMap<String, String>,

    /// Value of `<html lang>`, if present
    pub language: Option<String>,

    /// Set when LD+JSON declares `isAccessibleForFree: false` or an element
    /// carries one of the configured paywall classes
    pub is_paywalled: bool,
}

impl ParsedDocument {
    /// The Open Graph page type, e.g. `article`
    pub fn page_type(&self) -> Option<&str> {
        self.metadata.get("og:type").map(String::as_str)
    }

    pub fn description(&self) -> Option<&str> {
        self.metadata
            .get("og:description")
            .or_else(|| self.metadata.get("description"))
            .map(String::as_str)
    }
}

/// Decodes raw body bytes with the declared character set
///
/// A missing or unrecognized label falls back to UTF-8. A byte-order mark
/// overrides the declared label. Malformed input is an error rather than
/// being patched with replacement characters.
pub fn decode_body(bytes: &[u8], charset: Option<&str>) -> Result<String, ParseError> {
    let declared = charset
        .and_then(|label| Encoding::for_label(label.trim().as_bytes()))
        .unwrap_or(UTF_8);

    let (encoding, body) = match Encoding::for_bom(bytes) {
        Some((encoding, bom_len)) => (encoding, &bytes[bom_len..]),
        None => (declared, bytes),
    };

    encoding
        .decode_without_bom_handling_and_without_replacement(body)
        .map(|text| text.into_owned())
        .ok_or_else(|| ParseError::Undecodable {
            charset: encoding.name().to_string(),
        })
}

/// Decodes and parses a fetched document
///
/// # Arguments
///
/// * `bytes` - Raw response body
/// * `charset` - Character set declared by the server, if any
/// * `options` - Link extraction options
///
/// # Returns
///
/// * `Ok(ParsedDocument)` - Extraction succeeded, possibly with empty fields
/// * `Err(ParseError)` - The bytes are not valid in the effective charset
///
/// # Example
///
/// ```
/// use babble_ingest::crawler::{parse_document, ParseOptions};
///
/// let html = br#"<html lang="es"><body><p>Hola</p></body></html>"#;
/// let doc = parse_document(html, None, &ParseOptions::default()).unwrap();
/// assert_eq!(doc.language.as_deref(), Some("es"));
/// assert_eq!(doc.body_text, "Hola");
/// ```
pub fn parse_document(
    bytes: &[u8],
    charset: Option<&str>,
    options: &ParseOptions,
) -> Result<ParsedDocument, ParseError> {
    let html = decode_body(bytes, charset)?;
    Ok(parse_html(&html, options))
}

/// Parses already-decoded HTML
///
/// Malformed markup never fails; html5ever recovers and the recovery
/// messages are logged at debug level.
pub fn parse_html(html: &str, options: &ParseOptions) -> ParsedDocument {
    let document = Html::parse_document(html);
    for error in &document.errors {
        debug!("Recovered from malformed HTML: {}", error);
    }

    let mut text_nodes: Vec<&str> = Vec::new();
    let mut parsed = ParsedDocument::default();

    // Explicit stack so pathological nesting cannot overflow
    let mut stack = vec![(document.tree.root(), false)];
    while let Some((node, collecting)) = stack.pop() {
        let collecting = match node.value() {
            Node::Text(text) => {
                let text = text.trim();
                if collecting && !text.is_empty() {
                    text_nodes.push(text);
                }
                continue;
            }
            Node::Element(element) => {
                visit_element(element, options, &mut parsed);
                if is_ld_json(element) {
                    if let Some(script) = ElementRef::wrap(node) {
                        let payload: String = script.text().collect();
                        parsed.is_paywalled |= ld_json_is_paywalled(&payload);
                    }
                }
                TEXT_TAGS.contains(&element.name())
            }
            _ => collecting,
        };

        for child in node.children().rev() {
            stack.push((child, collecting));
        }
    }

    parsed.body_text = text_nodes.join("\n");
    parsed
}

fn visit_element(element: &Element, options: &ParseOptions, parsed: &mut ParsedDocument) {
    if !parsed.is_paywalled && !options.paywall_classes.is_empty() {
        parsed.is_paywalled = element
            .classes()
            .any(|class| options.paywall_classes.iter().any(|p| p == class));
    }

    match element.name() {
        "a" => {
            if let Some(link) = element.attr("href").and_then(|href| filter_href(href, options)) {
                parsed.links.push(link);
            }
        }
        "meta" => {
            let key = element.attr("name").or_else(|| element.attr("property"));
            if let (Some(key), Some(value)) = (key, element.attr("content")) {
                parsed.metadata.insert(key.to_string(), value.to_string());
            }
        }
        "html" => {
            if parsed.language.is_none() {
                parsed.language = element
                    .attr("lang")
                    .map(str::trim)
                    .filter(|lang| !lang.is_empty())
                    .map(str::to_string);
            }
        }
        _ => {}
    }
}

fn is_ld_json(element: &Element) -> bool {
    element.name() == "script"
        && element
            .attr("type")
            .is_some_and(|t| t.trim().eq_ignore_ascii_case("application/ld+json"))
}

/// Checks one LD+JSON payload for `isAccessibleForFree: false`
///
/// The payload may be a single object, an array of objects, or an object
/// with an `@graph` array. Both the boolean and the string `"false"` count.
fn ld_json_is_paywalled(payload: &str) -> bool {
    match serde_json::from_str::<Value>(payload) {
        Ok(value) => declares_not_free(&value),
        Err(e) => {
            debug!("Ignoring unparseable LD+JSON: {}", e);
            false
        }
    }
}

fn declares_not_free(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.iter().any(declares_not_free),
        Value::Object(map) => {
            let not_free = match map.get("isAccessibleForFree") {
                Some(Value::Bool(free)) => !free,
                Some(Value::String(free)) => free.trim().eq_ignore_ascii_case("false"),
                _ => false,
            };
            not_free || map.get("@graph").is_some_and(declares_not_free)
        }
        _ => false,
    }
}

/// Applies the link filtering rules to one href
///
/// Returns None if the link should be excluded:
/// - Empty or fragment-only hrefs
/// - Relative hrefs under [`RelativeLinkPolicy::Drop`], or without a base URL
/// - Non-HTTP(S) schemes such as `javascript:` or `mailto:`
/// - Static image assets
fn filter_href(href: &str, options: &ParseOptions) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => match options.relative_links {
            RelativeLinkPolicy::Drop => return None,
            RelativeLinkPolicy::Resolve => options.base_url.as_ref()?.join(href).ok()?,
        },
        Err(_) => return None,
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }
    if is_asset(&url) {
        return None;
    }

    Some(url.to_string())
}

fn is_asset(url: &Url) -> bool {
    let path = url.path().to_ascii_lowercase();
    ASSET_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
}
