//! Web search -- query a search backend and format title/url/snippet triples.
//!
//! Engines:
//!   - `duckduckgo`: HTML endpoint scraping, no key needed
//!   - `brave`: Brave Search API, needs `BRAVE_API_KEY`
//!
//! When the call names no engine, Brave is used if a key is configured and
//! DuckDuckGo otherwise.  Backend failures are returned as
//! [`ToolError::ExecutionFailed`], never panics.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, SandboxError, ToolError};
use crate::web::{BROWSER_USER_AGENT, collapse_whitespace, strip_html_tags};

const TOOL: &str = "web_search";

/// Upper bound on `numResults`.
pub const MAX_RESULTS: usize = 20;

const DUCKDUCKGO_HTML_URL: &str = "https://html.duckduckgo.com/html/";
const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

/// Search backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchEngine {
    DuckDuckGo,
    Brave,
}

impl fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuckDuckGo => write!(f, "duckduckgo"),
            Self::Brave => write!(f, "brave"),
        }
    }
}

impl FromStr for SearchEngine {
    type Err = ToolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(Self::DuckDuckGo),
            "brave" => Ok(Self::Brave),
            other => Err(ToolError::invalid(
                TOOL,
                format!("unknown engine `{other}` (expected duckduckgo or brave)"),
            )),
        }
    }
}

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Runs web searches.
pub struct WebSearcher {
    client: reqwest::Client,
    brave_api_key: Option<String>,
    default_results: usize,
    timeout: Duration,
}

impl WebSearcher {
    pub fn new(
        timeout: Duration,
        default_results: usize,
        brave_api_key: Option<String>,
    ) -> std::result::Result<Self, SandboxError> {
        let client = reqwest::Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            brave_api_key: brave_api_key.filter(|k| !k.is_empty()),
            default_results: default_results.clamp(1, MAX_RESULTS),
            timeout,
        })
    }

    /// Search for `query` and return numbered results.
    pub async fn search(
        &self,
        query: &str,
        num_results: Option<usize>,
        engine: Option<&str>,
    ) -> Result<String> {
        let query = query.trim();
        if query.is_empty() {
            return Err(ToolError::invalid(TOOL, "query is empty"));
        }

        let count = num_results
            .unwrap_or(self.default_results)
            .clamp(1, MAX_RESULTS);
        let engine = match engine.map(str::trim).filter(|e| !e.is_empty()) {
            Some(name) => name.parse()?,
            None if self.brave_api_key.is_some() => SearchEngine::Brave,
            None => SearchEngine::DuckDuckGo,
        };

        debug!(query, count, %engine, "performing web search");
        let hits = match engine {
            SearchEngine::Brave => {
                let Some(key) = self.brave_api_key.as_deref() else {
                    return Err(ToolError::failed("brave search requires BRAVE_API_KEY"));
                };
                self.search_brave(query, count, key).await?
            }
            SearchEngine::DuckDuckGo => self.search_duckduckgo(query, count).await?,
        };

        debug!(count = hits.len(), %engine, "search completed");
        Ok(format_results(query, &hits))
    }

    fn request_error(&self, engine: SearchEngine, e: reqwest::Error) -> ToolError {
        if e.is_timeout() {
            ToolError::Timeout {
                what: format!("{engine} search"),
                after: self.timeout,
            }
        } else {
            warn!(%engine, error = %e, "search request failed");
            ToolError::failed(format!("{engine} request failed: {e}"))
        }
    }

    // ───────────────────────────────────────────────────────────────────
    //  Brave Search API
    // ───────────────────────────────────────────────────────────────────

    async fn search_brave(&self, query: &str, count: usize, api_key: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .get(BRAVE_SEARCH_URL)
            .header("X-Subscription-Token", api_key)
            .header("Accept", "application/json")
            .query(&[("q", query), ("count", &count.to_string())])
            .send()
            .await
            .map_err(|e| self.request_error(SearchEngine::Brave, e))?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "brave returned status {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ToolError::failed(format!("failed to parse brave response: {e}")))?;
        Ok(parse_brave_results(&body, count))
    }

    // ───────────────────────────────────────────────────────────────────
    //  DuckDuckGo HTML endpoint
    // ───────────────────────────────────────────────────────────────────

    async fn search_duckduckgo(&self, query: &str, count: usize) -> Result<Vec<SearchHit>> {
        let response = self
            .client
            .post(DUCKDUCKGO_HTML_URL)
            .form(&[("q", query), ("kl", ""), ("df", "")])
            .send()
            .await
            .map_err(|e| self.request_error(SearchEngine::DuckDuckGo, e))?;

        if !response.status().is_success() {
            return Err(ToolError::failed(format!(
                "duckduckgo returned status {}",
                response.status()
            )));
        }

        let html = response
            .text()
            .await
            .map_err(|e| self.request_error(SearchEngine::DuckDuckGo, e))?;
        Ok(parse_duckduckgo_results(&html, count))
    }
}

/// Render hits as a numbered list the model can read.
pub fn format_results(query: &str, hits: &[SearchHit]) -> String {
    if hits.is_empty() {
        return format!("No results found for \"{query}\".");
    }

    let mut out = format!("Search results for \"{query}\":\n");
    for (i, hit) in hits.iter().enumerate() {
        out.push_str(&format!("\n{}. {}\n   {}\n", i + 1, hit.title, hit.url));
        if !hit.snippet.is_empty() {
            out.push_str(&format!("   {}\n", hit.snippet));
        }
    }
    out.trim_end().to_owned()
}

fn clean_text(html: &str) -> String {
    collapse_whitespace(&strip_html_tags(html))
}

fn parse_brave_results(body: &Value, count: usize) -> Vec<SearchHit> {
    let Some(items) = body.pointer("/web/results").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or("");
            let (title, url) = (field("title"), field("url"));
            if title.is_empty() && url.is_empty() {
                return None;
            }
            Some(SearchHit {
                title: clean_text(title),
                url: url.to_owned(),
                snippet: clean_text(field("description")),
            })
        })
        .take(count)
        .collect()
}

fn parse_duckduckgo_results(html: &str, count: usize) -> Vec<SearchHit> {
    const TITLE_MARKER: &str = "class=\"result__a\"";
    const SNIPPET_MARKER: &str = "class=\"result__snippet\"";

    let positions = |marker: &str| -> Vec<usize> {
        html.match_indices(marker).map(|(pos, _)| pos).collect()
    };
    let titles = positions(TITLE_MARKER);
    let snippets = positions(SNIPPET_MARKER);

    let mut hits = Vec::new();
    for (i, &title_pos) in titles.iter().enumerate() {
        if hits.len() >= count {
            break;
        }

        let url = extract_href_before(&html[..title_pos])
            .map(|href| clean_ddg_url(&href))
            .unwrap_or_default();
        let title = clean_text(&extract_tag_text(&html[title_pos + TITLE_MARKER.len()..], "</a>"));
        let snippet = snippets
            .get(i)
            .map(|&pos| clean_text(&extract_tag_text(&html[pos + SNIPPET_MARKER.len()..], "</")))
            .unwrap_or_default();

        if !title.is_empty() || !url.is_empty() {
            hits.push(SearchHit {
                title,
                url,
                snippet,
            });
        }
    }
    hits
}

/// Resolve DuckDuckGo redirect links (`//duckduckgo.com/l/?uddg=...`) to the
/// destination URL.
fn clean_ddg_url(raw: &str) -> String {
    let absolute = match raw.strip_prefix("//") {
        Some(rest) => format!("https://{rest}"),
        None => raw.to_owned(),
    };

    if let Ok(parsed) = Url::parse(&absolute) {
        let is_redirect = parsed
            .host_str()
            .is_some_and(|h| h.ends_with("duckduckgo.com"))
            && parsed.path().starts_with("/l/");
        if is_redirect {
            if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
                return target.into_owned();
            }
        }
    }
    absolute
}

fn extract_href_before(html_before: &str) -> Option<String> {
    const HREF: &str = "href=\"";
    let start = html_before.rfind(HREF)? + HREF.len();
    let remaining = &html_before[start..];
    let end = remaining.find('"')?;
    Some(remaining[..end].to_owned())
}

fn extract_tag_text(html_after_marker: &str, end_marker: &str) -> String {
    let Some(open_end) = html_after_marker.find('>') else {
        return String::new();
    };
    let content = &html_after_marker[open_end + 1..];
    let end = content.find(end_marker).unwrap_or(content.len());
    content[..end].to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolErrorKind;
    use serde_json::json;

    fn searcher(key: Option<&str>) -> WebSearcher {
        WebSearcher::new(Duration::from_secs(5), 10, key.map(String::from)).unwrap()
    }

    #[tokio::test]
    async fn empty_query_is_rejected() {
        let err = searcher(None).search("  ", None, None).await.unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn unknown_engine_is_rejected() {
        let err = searcher(None)
            .search("rust", None, Some("altavista"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::InvalidArguments);
    }

    #[tokio::test]
    async fn brave_without_key_is_unsuccessful() {
        let err = searcher(None)
            .search("rust", None, Some("brave"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ToolErrorKind::ExecutionFailed);
    }

    #[test]
    fn engine_names_parse() {
        assert_eq!("DDG".parse::<SearchEngine>().unwrap(), SearchEngine::DuckDuckGo);
        assert_eq!("brave".parse::<SearchEngine>().unwrap(), SearchEngine::Brave);
    }

    #[test]
    fn parse_duckduckgo_results_extracts_data() {
        let html = r#"
        <div class="result">
            <a rel="nofollow" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&amp;rut=abc" class="result__a">Example <b>Title</b></a>
            <a class="result__snippet" href="x">This is a snippet about Example.</a>
        </div>
        <div class="result">
            <a rel="nofollow" href="https://other.com" class="result__a">Other Result</a>
            <a class="result__snippet" href="y">Another snippet here.</a>
        </div>
        "#;

        let hits = parse_duckduckgo_results(html, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Example Title");
        assert_eq!(hits[0].url, "https://example.com/page");
        assert_eq!(hits[0].snippet, "This is a snippet about Example.");
        assert_eq!(hits[1].url, "https://other.com");
    }

    #[test]
    fn parse_duckduckgo_results_respects_count() {
        let html = r#"
        <a href="https://a.com" class="result__a">A</a>
        <a href="https://b.com" class="result__a">B</a>
        <a href="https://c.com" class="result__a">C</a>
        "#;
        assert_eq!(parse_duckduckgo_results(html, 2).len(), 2);
        assert!(parse_duckduckgo_results("", 5).is_empty());
    }

    #[test]
    fn parse_brave_results_reads_web_section() {
        let body = json!({
            "web": { "results": [
                { "title": "Rust <strong>Lang</strong>", "url": "https://rust-lang.org", "description": "A language" },
                { "title": "", "url": "" },
                { "title": "Docs", "url": "https://doc.rust-lang.org" }
            ]}
        });
        let hits = parse_brave_results(&body, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Rust Lang");
        assert_eq!(hits[1].snippet, "");
        assert!(parse_brave_results(&json!({}), 10).is_empty());
    }

    #[test]
    fn clean_ddg_url_variants() {
        assert_eq!(clean_ddg_url("https://example.com"), "https://example.com");
        assert_eq!(clean_ddg_url("//example.com/p"), "https://example.com/p");
    }

    #[test]
    fn format_results_numbers_hits() {
        let hits = vec![
            SearchHit {
                title: "One".into(),
                url: "https://one.example".into(),
                snippet: "first".into(),
            },
            SearchHit {
                title: "Two".into(),
                url: "https://two.example".into(),
                snippet: String::new(),
            },
        ];
        let text = format_results("q", &hits);
        assert!(text.starts_with("Search results for \"q\":"));
        assert!(text.contains("1. One\n   https://one.example\n   first"));
        assert!(text.ends_with("2. Two\n   https://two.example"));
        assert_eq!(format_results("q", &[]), "No results found for \"q\".");
    }
}
