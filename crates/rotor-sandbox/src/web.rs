//! Web fetch -- retrieve a page and return clean, readable text.
//!
//! Features:
//!   - URL guard: only `http`/`https`; hostnames such as `localhost`,
//!     `*.local`, `*.internal` and cloud metadata endpoints are refused, as is
//!     any host that is, or resolves to, a loopback/private/link-local address
//!   - redirects are re-checked against the same hostname and IP rules
//!   - the client's own resolver drops private addresses, so a host cannot
//!     pass the guard and then rebind to an internal address on connect
//!   - Readability extraction, html2text fallback, tag-strip last resort
//!   - optional selector extraction (`tag`, `.class`, `#id`, `tag.class`,
//!     `tag#id`)
//!   - in-memory TTL cache via moka
//!   - truncation to a character limit on a char boundary

use std::io::Cursor;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use regex::Regex;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{Result, SandboxError, ToolError};

// ═══════════════════════════════════════════════════════════════════════
//  Constants
// ═══════════════════════════════════════════════════════════════════════

const TOOL: &str = "browse_website";

/// Maximum HTML size (in bytes) to feed into Readability.
const READABILITY_MAX_HTML_BYTES: usize = 2_000_000;

/// Cache TTL in minutes.
const CACHE_TTL_MINUTES: u64 = 15;
/// Maximum cached entries.
const CACHE_MAX_ENTRIES: u64 = 100;

const MAX_REDIRECTS: usize = 5;

/// Realistic browser User-Agent to avoid being blocked.
pub(crate) const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Hostnames refused outright.
const DENIED_HOSTS: &[&str] = &[
    "localhost",
    "metadata",
    "metadata.google.internal",
    "instance-data",
    "instance-data.ec2.internal",
];

/// Hostname suffixes refused outright.
const DENIED_HOST_SUFFIXES: &[&str] = &[".localhost", ".local", ".internal", ".lan", ".home.arpa"];

// ═══════════════════════════════════════════════════════════════════════
//  Fetcher
// ═══════════════════════════════════════════════════════════════════════

/// Fetches pages for `browse_website`.
pub struct WebFetcher {
    client: reqwest::Client,
    cache: Cache<String, String>,
    timeout: Duration,
}

impl WebFetcher {
    pub fn new(timeout: Duration) -> std::result::Result<Self, SandboxError> {
        let redirect = reqwest::redirect::Policy::custom(|attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                attempt.error("too many redirects")
            } else if let Err(reason) = check_host(attempt.url()) {
                attempt.error(reason)
            } else {
                attempt.follow()
            }
        });

        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .redirect(redirect)
            .dns_resolver(Arc::new(PublicResolver))
            .build()?;

        let cache = Cache::builder()
            .max_capacity(CACHE_MAX_ENTRIES)
            .time_to_live(Duration::from_secs(CACHE_TTL_MINUTES * 60))
            .build();

        Ok(Self {
            client,
            cache,
            timeout,
        })
    }

    /// Fetch `url` and return at most `max_length` characters of extracted
    /// text.  With a `selector`, only matching elements are extracted.
    pub async fn browse(
        &self,
        url: &str,
        selector: Option<&str>,
        max_length: usize,
    ) -> Result<String> {
        let url = url.trim();
        if url.is_empty() {
            return Err(ToolError::invalid(TOOL, "url is empty"));
        }
        let parsed =
            Url::parse(url).map_err(|e| ToolError::invalid(TOOL, format!("invalid URL `{url}`: {e}")))?;
        let selector = selector.map(str::trim).filter(|s| !s.is_empty());
        let parsed_selector = selector.map(Selector::parse).transpose()?;

        check_url(&parsed).await?;

        let cache_key = format!("{parsed}|{}|{max_length}", selector.unwrap_or(""));
        if let Some(cached) = self.cache.get(&cache_key).await {
            debug!(url, "returning cached fetch result");
            return Ok(cached);
        }

        debug!(url, ?selector, max_length, "fetching URL");
        let response = self
            .client
            .get(parsed.clone())
            .header(
                "Accept",
                "text/html, application/xhtml+xml;q=0.9, text/plain;q=0.8, */*;q=0.1",
            )
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "server returned status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("text/plain")
            .to_owned();

        let body = response
            .text()
            .await
            .map_err(|e| self.request_error(url, e))?;

        let is_html = content_type.contains("html");
        let text = match (&parsed_selector, is_html) {
            (Some(sel), true) => {
                let fragments = sel.select(&body);
                if fragments.is_empty() {
                    return Err(ToolError::failed(format!(
                        "selector `{}` matched nothing",
                        selector.unwrap_or_default()
                    )));
                }
                fragments
                    .iter()
                    .map(|f| fragment_text(f))
                    .filter(|t| !t.is_empty())
                    .collect::<Vec<_>>()
                    .join("\n\n")
            }
            (None, true) => extract_content_from_html(&body, parsed.as_str()).0,
            (_, false) => body,
        };

        let text = truncate_chars(&text, max_length);
        debug!(url, content_type, length = text.len(), "fetch completed");
        self.cache.insert(cache_key, text.clone()).await;
        Ok(text)
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> ToolError {
        if e.is_timeout() {
            warn!(url, "fetch timed out");
            ToolError::Timeout {
                what: format!("fetch of `{url}`"),
                after: self.timeout,
            }
        } else if e.is_redirect() {
            ToolError::unsafe_(format!("redirect refused: {e}"))
        } else if let Some(private) = find_source::<PrivateAddress>(&e) {
            warn!(url, host = %private.host, "connection to private address refused");
            ToolError::unsafe_(private.to_string())
        } else {
            ToolError::failed(format!("HTTP request failed: {e}"))
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  URL guard
// ═══════════════════════════════════════════════════════════════════════

/// Full check: scheme, hostname rules, and every DNS-resolved address.
pub async fn check_url(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(ToolError::unsafe_(format!(
                "unsupported URL scheme `{scheme}`"
            )));
        }
    }

    check_host(url).map_err(ToolError::unsafe_)?;

    let Some(Host::Domain(domain)) = url.host() else {
        // Literal addresses were fully checked by `check_host`.
        return Ok(());
    };

    let port = url.port_or_known_default().unwrap_or(443);
    let addrs = tokio::net::lookup_host((domain, port))
        .await
        .map_err(|e| ToolError::failed(format!("DNS resolution failed for `{domain}`: {e}")))?;

    for addr in addrs {
        if is_private_ip(addr.ip()) {
            return Err(ToolError::unsafe_(format!(
                "host `{domain}` resolves to private address {}",
                addr.ip()
            )));
        }
    }

    Ok(())
}

/// Raised by [`PublicResolver`] when a host has no public address.
#[derive(Debug, thiserror::Error)]
#[error("host `{host}` resolves only to private addresses")]
struct PrivateAddress {
    host: String,
}

/// DNS resolver for the fetch client that discards private addresses.
///
/// The guard in [`check_url`] resolves once up front; this resolver applies
/// the same rule to the lookup reqwest performs when it connects.
struct PublicResolver;

impl Resolve for PublicResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(resolve_public(name.as_str().to_owned()))
    }
}

async fn resolve_public(
    host: String,
) -> std::result::Result<Addrs, Box<dyn std::error::Error + Send + Sync>> {
    let resolved: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), 0))
        .await?
        .filter(|addr| !is_private_ip(addr.ip()))
        .collect();
    if resolved.is_empty() {
        return Err(PrivateAddress { host }.into());
    }
    Ok(Box::new(resolved.into_iter()))
}

fn find_source<'a, E: std::error::Error + 'static>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a E> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(found) = e.downcast_ref::<E>() {
            return Some(found);
        }
        current = e.source();
    }
    None
}

/// Synchronous part of the guard, also applied to redirect targets.
fn check_host(url: &Url) -> std::result::Result<(), String> {
    match url.host() {
        None => Err("URL has no host".into()),
        Some(Host::Ipv4(v4)) if is_private_ip(IpAddr::V4(v4)) => {
            Err(format!("{v4} is a private or loopback address"))
        }
        Some(Host::Ipv6(v6)) if is_private_ip(IpAddr::V6(v6)) => {
            Err(format!("{v6} is a private or loopback address"))
        }
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            let denied = DENIED_HOSTS.contains(&domain.as_str())
                || DENIED_HOST_SUFFIXES.iter().any(|s| domain.ends_with(s));
            if denied {
                Err(format!("host `{domain}` is internal"))
            } else {
                Ok(())
            }
        }
        Some(_) => Ok(()),
    }
}

/// Loopback, private, link-local, CGNAT, unspecified and similar ranges.
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_v4(v4);
            }
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

fn is_private_v4(v4: Ipv4Addr) -> bool {
    let [a, b, c, _] = v4.octets();
    v4.is_loopback()
        || v4.is_private()
        || v4.is_link_local()
        || v4.is_unspecified()
        || v4.is_broadcast()
        // 0.0.0.0/8
        || a == 0
        // 100.64.0.0/10 (CGNAT)
        || (a == 100 && (b & 0xC0) == 64)
        // 192.0.0.0/24 (IETF protocol assignments)
        || (a == 192 && b == 0 && c == 0)
}

// ═══════════════════════════════════════════════════════════════════════
//  Selectors
// ═══════════════════════════════════════════════════════════════════════

/// A simple selector: an optional tag name plus an optional class or id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    tag: Option<String>,
    class: Option<String>,
    id: Option<String>,
}

impl Selector {
    /// Parse `tag`, `.class`, `#id`, `tag.class` or `tag#id`.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = || {
            ToolError::invalid(
                TOOL,
                format!("unsupported selector `{input}` (use tag, .class, #id, tag.class or tag#id)"),
            )
        };

        let (tag, rest) = match input.find(['.', '#']) {
            Some(pos) => (&input[..pos], Some(&input[pos..])),
            None => (input, None),
        };

        let valid_name = |s: &str| {
            !s.is_empty()
                && s.chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };

        let tag = if tag.is_empty() {
            None
        } else if valid_name(tag) {
            Some(tag.to_ascii_lowercase())
        } else {
            return Err(invalid());
        };

        let (class, id) = match rest {
            None => (None, None),
            Some(rest) => {
                let name = &rest[1..];
                if !valid_name(name) {
                    return Err(invalid());
                }
                if rest.starts_with('.') {
                    (Some(name.to_owned()), None)
                } else {
                    (None, Some(name.to_owned()))
                }
            }
        };

        if tag.is_none() && class.is_none() && id.is_none() {
            return Err(invalid());
        }
        Ok(Self { tag, class, id })
    }

    /// Outer HTML of every element matching the selector, in document order.
    /// Nested matches inside an earlier match are not reported twice.
    pub fn select(&self, html: &str) -> Vec<String> {
        let Ok(open_tag) = Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)\b([^>]*)>") else {
            return Vec::new();
        };

        let mut fragments = Vec::new();
        let mut cursor = 0;
        while let Some(caps) = open_tag.captures_at(html, cursor) {
            let (Some(whole), Some(name), Some(attrs)) = (caps.get(0), caps.get(1), caps.get(2))
            else {
                break;
            };
            let name = name.as_str().to_ascii_lowercase();

            if self.matches(&name, attrs.as_str()) {
                let end = element_end(html, &name, whole.end(), attrs.as_str());
                fragments.push(html[whole.start()..end].to_owned());
                cursor = end;
            } else {
                cursor = whole.end();
            }
        }
        fragments
    }

    fn matches(&self, tag: &str, attrs: &str) -> bool {
        if self.tag.as_deref().is_some_and(|t| t != tag) {
            return false;
        }
        if let Some(class) = &self.class {
            let has_class = attribute(attrs, "class")
                .is_some_and(|v| v.split_whitespace().any(|c| c == class));
            if !has_class {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if attribute(attrs, "id").as_deref() != Some(id.as_str()) {
                return false;
            }
        }
        true
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Byte offset just past the element that opened at `after_open`, counting
/// nested elements of the same name.  Unclosed elements run to the end.
fn element_end(html: &str, name: &str, after_open: usize, attrs: &str) -> usize {
    if VOID_ELEMENTS.contains(&name) || attrs.trim_end().ends_with('/') {
        return after_open;
    }
    let Ok(tags) = Regex::new(&format!(r"(?i)<(/?){}\b[^>]*>", regex::escape(name))) else {
        return html.len();
    };

    let mut depth = 1usize;
    for caps in tags.captures_iter(&html[after_open..]) {
        let closing = caps.get(1).is_some_and(|m| !m.as_str().is_empty());
        if closing {
            depth -= 1;
            if depth == 0 {
                return caps.get(0).map_or(html.len(), |m| after_open + m.end());
            }
        } else {
            depth += 1;
        }
    }
    html.len()
}

fn attribute(attrs: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r#"(?i)(?:^|\s){}\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#,
        regex::escape(name)
    );
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))
        .map(|m| m.as_str().to_owned())
}

fn fragment_text(fragment: &str) -> String {
    try_html2text(fragment).unwrap_or_else(|| extract_text_regex(fragment))
}

// ═══════════════════════════════════════════════════════════════════════
//  HTML content extraction (Readability -> html2text -> tag strip)
// ═══════════════════════════════════════════════════════════════════════

/// Extract readable content from HTML.  Returns `(content, extractor_name)`.
pub fn extract_content_from_html(html: &str, url_str: &str) -> (String, &'static str) {
    if html.len() <= READABILITY_MAX_HTML_BYTES {
        if let Some(text) = try_readability(html, url_str) {
            if text.len() > 100 {
                return (text, "readability");
            }
        }
    }

    if let Some(text) = try_html2text(html) {
        if text.len() > 50 {
            return (text, "html2text");
        }
    }

    (extract_text_regex(html), "strip")
}

fn try_readability(html: &str, url_str: &str) -> Option<String> {
    let parsed_url = Url::parse(url_str).ok()?;
    let mut cursor = Cursor::new(html.as_bytes());

    match readability::extractor::extract(&mut cursor, &parsed_url) {
        Ok(product) => {
            let text = product.text.trim().to_owned();
            if text.is_empty() { None } else { Some(text) }
        }
        Err(e) => {
            debug!("readability extraction failed: {e}");
            None
        }
    }
}

fn try_html2text(html: &str) -> Option<String> {
    let text = html2text::from_read(html.as_bytes(), 120).ok()?;
    let trimmed = text.trim().to_owned();
    if trimmed.is_empty() { None } else { Some(trimmed) }
}

/// Last resort: drop script/style/nav blocks, strip tags, collapse whitespace.
fn extract_text_regex(html: &str) -> String {
    let mut cleaned = html.to_owned();
    for tag in ["script", "style", "nav", "noscript"] {
        cleaned = remove_tag_blocks(&cleaned, tag);
    }
    collapse_whitespace(&strip_html_tags(&cleaned))
}

/// Remove all occurrences of `<tag ...>...</tag>` (case-insensitive).
fn remove_tag_blocks(html: &str, tag: &str) -> String {
    let open_pattern = format!("<{tag}");
    let close_pattern = format!("</{tag}>");
    let mut result = String::with_capacity(html.len());
    let lower = html.to_ascii_lowercase();
    let mut cursor = 0;

    while cursor < html.len() {
        let Some(start) = lower[cursor..].find(&open_pattern) else {
            result.push_str(&html[cursor..]);
            break;
        };
        let abs_start = cursor + start;
        result.push_str(&html[cursor..abs_start]);
        cursor = match lower[abs_start..].find(&close_pattern) {
            Some(end) => abs_start + end + close_pattern.len(),
            None => html.len(),
        };
    }
    result
}

/// Strip HTML tags and decode common entities.
pub(crate) fn strip_html_tags(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut inside_tag = false;

    for ch in input.chars() {
        match ch {
            '<' => inside_tag = true,
            '>' => {
                inside_tag = false;
                result.push(' ');
            }
            _ if !inside_tag => result.push(ch),
            _ => {}
        }
    }

    result
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
}

/// Collapse runs of spaces and allow at most two consecutive newlines.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut newlines = 0u32;
    let mut prev_space = false;

    for ch in text.chars() {
        if ch == '\n' {
            newlines += 1;
            prev_space = false;
            if newlines <= 2 {
                result.push('\n');
            }
        } else if ch.is_whitespace() {
            newlines = 0;
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            newlines = 0;
            prev_space = false;
            result.push(ch);
        }
    }

    result.trim().to_owned()
}

const TRUNCATION_NOTICE: &str = "\n\n... [content truncated]";

/// Keep at most `max_chars` characters.  When the content is cut, the notice
/// is counted within the limit.
pub(crate) fn truncate_chars(content: &str, max_chars: usize) -> String {
    if content.chars().nth(max_chars).is_none() {
        return content.to_owned();
    }
    let notice_chars = TRUNCATION_NOTICE.chars().count();
    if max_chars <= notice_chars {
        return content.chars().take(max_chars).collect();
    }
    let keep = max_chars - notice_chars;
    let end = content
        .char_indices()
        .nth(keep)
        .map_or(content.len(), |(i, _)| i);
    format!("{}{TRUNCATION_NOTICE}", &content[..end])
}

// ═══════════════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;

    fn fetcher() -> WebFetcher {
        WebFetcher::new(Duration::from_secs(5)).unwrap()
    }

    async fn kind_of(url: &str) -> ToolErrorKind {
        fetcher().browse(url, None, 1000).await.unwrap_err().kind()
    }

    // ─────────────────────────────────────────────────────────────────
    //  URL guard
    // ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn rejects_localhost() {
        assert_eq!(kind_of("http://localhost:8080/admin").await, ToolErrorKind::Unsafe);
        assert_eq!(kind_of("http://LOCALHOST./").await, ToolErrorKind::Unsafe);
    }

    #[tokio::test]
    async fn rejects_private_and_loopback_literals() {
        assert_eq!(kind_of("http://127.0.0.1/").await, ToolErrorKind::Unsafe);
        assert_eq!(kind_of("http://10.1.2.3/").await, ToolErrorKind::Unsafe);
        assert_eq!(kind_of("http://[::1]:8000/").await, ToolErrorKind::Unsafe);
        assert_eq!(
            kind_of("http://169.254.169.254/latest/meta-data").await,
            ToolErrorKind::Unsafe
        );
    }

    #[tokio::test]
    async fn rejects_internal_hostnames() {
        assert_eq!(
            kind_of("http://metadata.google.internal/").await,
            ToolErrorKind::Unsafe
        );
        assert_eq!(kind_of("http://printer.local/").await, ToolErrorKind::Unsafe);
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        assert_eq!(kind_of("file:///etc/passwd").await, ToolErrorKind::Unsafe);
        assert_eq!(kind_of("ftp://example.com/").await, ToolErrorKind::Unsafe);
    }

    #[tokio::test]
    async fn rejects_malformed_input() {
        assert_eq!(kind_of("").await, ToolErrorKind::InvalidArguments);
        assert_eq!(kind_of("not a url").await, ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn resolver_drops_loopback_addresses() {
        let err = match resolve_public("localhost".to_owned()).await {
            Ok(addrs) => panic!("expected no public addresses, got {:?}", addrs.collect::<Vec<_>>()),
            Err(e) => e,
        };
        let private = err.downcast_ref::<PrivateAddress>().unwrap();
        assert_eq!(private.host, "localhost");
    }

    #[test]
    fn private_ranges() {
        for ip in [
            "127.0.0.1",
            "10.0.0.1",
            "172.16.0.1",
            "192.168.1.1",
            "169.254.1.1",
            "100.64.0.1",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(is_private_ip(ip.parse().unwrap()), "{ip} should be private");
        }
        for ip in ["8.8.8.8", "1.1.1.1", "2606:4700::1111"] {
            assert!(!is_private_ip(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    // ─────────────────────────────────────────────────────────────────
    //  Selectors
    // ─────────────────────────────────────────────────────────────────

    const PAGE: &str = r#"<html><body>
        <div id="nav">Menu</div>
        <div class="post featured"><p>First <b>post</b></p><div class="meta">by a</div></div>
        <div class="post"><p>Second post</p></div>
        <p class='note'>Footnote</p>
        <img class="post" src="x.png">
        </body></html>"#;

    #[test]
    fn selector_parsing() {
        assert!(Selector::parse("div").is_ok());
        assert!(Selector::parse(".post").is_ok());
        assert!(Selector::parse("div#nav").is_ok());
        assert!(Selector::parse("div > p").is_err());
        assert!(Selector::parse(".").is_err());
    }

    #[test]
    fn class_selector_handles_nesting() {
        let sel = Selector::parse("div.post").unwrap();
        let fragments = sel.select(PAGE);
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].contains("by a"));
        assert!(fragments[0].ends_with("</div>"));
        assert!(fragments[1].contains("Second post"));
    }

    #[test]
    fn id_and_tag_selectors() {
        let by_id = Selector::parse("#nav").unwrap().select(PAGE);
        assert_eq!(by_id.len(), 1);
        assert!(by_id[0].contains("Menu"));

        let by_class = Selector::parse(".note").unwrap().select(PAGE);
        assert_eq!(by_class.len(), 1);

        // Void elements match without swallowing the rest of the page.
        let images = Selector::parse("img.post").unwrap().select(PAGE);
        assert_eq!(images, [r#"<img class="post" src="x.png">"#]);
    }

    #[test]
    fn fragment_text_strips_markup() {
        let text = fragment_text("<p>First <b>post</b></p>");
        assert!(text.contains("First"));
        assert!(text.contains("post"));
        assert!(!text.contains("<b>"));
    }

    // ─────────────────────────────────────────────────────────────────
    //  Extraction
    // ─────────────────────────────────────────────────────────────────

    #[test]
    fn remove_tag_blocks_strips_scripts() {
        let html = "<p>Hello</p><script>alert('xss')</script><p>World</p>";
        let result = remove_tag_blocks(html, "script");
        assert!(!result.contains("alert"));
        assert!(result.contains("Hello"));
        assert!(result.contains("World"));
    }

    #[test]
    fn extract_text_regex_full_pipeline() {
        let html = r#"<html><head><style>body{}</style><script>var x=1;</script></head>
            <body><nav>Menu Item</nav><p>Main content here.</p></body></html>"#;
        let text = extract_text_regex(html);
        assert!(text.contains("Main content"));
        assert!(!text.contains("var x=1"));
        assert!(!text.contains("Menu Item"));
    }

    #[test]
    fn strip_html_tags_decodes_entities() {
        assert!(strip_html_tags("a &amp; b").contains("a & b"));
    }

    #[test]
    fn collapse_whitespace_limits_blank_lines() {
        let result = collapse_whitespace("hello    world\n\n\n\n\nfoo");
        assert!(result.contains("hello world"));
        assert!(!result.contains("\n\n\n"));
    }

    #[test]
    fn truncate_chars_respects_limit() {
        assert_eq!(truncate_chars("short", 100), "short");
        let exact = "x".repeat(40);
        assert_eq!(truncate_chars(&exact, 40), exact);

        let long = format!("ab€{}", "y".repeat(200));
        let cut = truncate_chars(&long, 60);
        assert!(cut.starts_with("ab€"));
        assert!(cut.ends_with("[content truncated]"));
        assert_eq!(cut.chars().count(), 60);
    }

    #[test]
    fn truncate_chars_with_tiny_limit_drops_the_notice() {
        assert_eq!(truncate_chars("ab€cdefgh", 3), "ab€");
    }
}
