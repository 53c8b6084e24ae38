//! Search-engine scraping and page fetching collaborators.
//!
//! Both capabilities sit behind traits so the pipeline can be exercised with
//! loopback implementations in tests:
//! - [`SearchScraper`] turns a query into `(title, url)` candidates by
//!   parsing the DuckDuckGo HTML results page.
//! - [`PageFetcher`] retrieves one page's markup with a bounded timeout.
//!
//! [`fetch_extracted`] is the shared fallback fan-out: a bounded-concurrency
//! batch fetch where each URL's failure is caught and skipped, never aborting
//! its siblings.

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::extract::extract_text;
use crate::models::{DocumentInput, SourceRef};

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// A `(title, url)` candidate produced by the scrape collaborator.
#[derive(Debug, Clone)]
pub struct ScrapedHit {
    pub title: String,
    pub url: String,
}

/// Turns a query string into ranked result candidates.
#[async_trait]
pub trait SearchScraper: Send + Sync {
    async fn scrape(&self, query: &str) -> Result<Vec<ScrapedHit>>;
}

/// Retrieves one page's raw markup.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// DuckDuckGo HTML-results scraper.
pub struct DuckDuckGoScraper {
    client: reqwest::Client,
    max_results: usize,
}

impl DuckDuckGoScraper {
    pub fn new(timeout_secs: u64, max_results: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_results,
        }
    }
}

#[async_trait]
impl SearchScraper for DuckDuckGoScraper {
    async fn scrape(&self, query: &str) -> Result<Vec<ScrapedHit>> {
        let response = self
            .client
            .get("https://duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?;
        let html = response.text().await?;
        Ok(parse_result_anchors(&html, self.max_results))
    }
}

/// Pull `(title, href)` pairs out of the result anchors, resolving each href
/// to a canonical absolute URL.
pub fn parse_result_anchors(html: &str, max_results: usize) -> Vec<ScrapedHit> {
    static ANCHOR: OnceLock<Regex> = OnceLock::new();
    let anchor = ANCHOR.get_or_init(|| {
        Regex::new(
            r#"(?is)<a\b[^>]*class="[^"]*result__(?:a|url)[^"]*"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#,
        )
        .unwrap()
    });
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"(?s)<[^>]+>").unwrap());

    let mut hits = Vec::new();
    for captures in anchor.captures_iter(html) {
        if hits.len() >= max_results {
            break;
        }
        let href = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        let title = tag
            .replace_all(captures.get(2).map(|m| m.as_str()).unwrap_or(""), "")
            .trim()
            .replace("&amp;", "&");
        if href.is_empty() || title.is_empty() {
            continue;
        }
        hits.push(ScrapedHit {
            title,
            url: resolve_result_url(href),
        });
    }
    hits
}

/// Resolve a result href to its canonical absolute URL.
///
/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>`; the real
/// URL is the decoded `uddg` query parameter. Scheme-relative and bare-host
/// hrefs are normalized to `https`.
pub fn resolve_result_url(href: &str) -> String {
    if href.starts_with("//duckduckgo.com/l/?") || href.starts_with("/l/?") {
        let full = if href.starts_with("//") {
            format!("https:{}", href)
        } else {
            format!("https://duckduckgo.com{}", href)
        };
        if let Ok(parsed) = Url::parse(&full) {
            if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
                return target.into_owned();
            }
        }
        return full;
    }
    if let Some(rest) = href.strip_prefix("//") {
        return format!("https://{}", rest);
    }
    if href.starts_with("http") {
        return href.to_string();
    }
    format!("https://{}", href.trim_start_matches('/'))
}

/// Plain HTTP page fetcher with a browser user agent.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        Ok(response.text().await?)
    }
}

/// Fetch up to `limit` sources concurrently, extract their text, and return
/// index-ready documents.
///
/// At most `concurrency` fetches are in flight at once; a failing or empty
/// URL is logged and skipped. Input order is preserved in the output.
pub async fn fetch_extracted(
    fetcher: &dyn PageFetcher,
    sources: &[SourceRef],
    limit: usize,
    concurrency: usize,
    max_content_chars: usize,
) -> Vec<DocumentInput> {
    let targets: Vec<(usize, String, String)> = sources
        .iter()
        .filter_map(|s| s.url.as_ref().map(|u| (s.title.clone(), u.clone())))
        .take(limit)
        .enumerate()
        .map(|(i, (title, url))| (i, title, url))
        .collect();

    let mut docs: Vec<(usize, DocumentInput)> = stream::iter(targets)
        .map(|(order, title, url)| async move {
            match fetcher.fetch(&url).await {
                Ok(html) => {
                    let text = extract_text(&html);
                    if text.trim().is_empty() {
                        debug!(%url, "fetched page produced no text; skipping");
                        None
                    } else {
                        Some((
                            order,
                            DocumentInput {
                                id: url.clone(),
                                title: if title.is_empty() { url.clone() } else { title },
                                url: Some(url),
                                content: truncate_chars(&text, max_content_chars),
                            },
                        ))
                    }
                }
                Err(e) => {
                    warn!(%url, error = %e, "fetch failed; skipping URL");
                    None
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .filter_map(|item| async move { item })
        .collect()
        .await;

    docs.sort_by_key(|(order, _)| *order);
    docs.into_iter().map(|(_, doc)| doc).collect()
}

/// Truncate at a character boundary (not bytes), preserving valid UTF-8.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_uddg_redirect_wrapper() {
        let href = "//duckduckgo.com/l/?uddg=https%3A%2F%2Fwww.nih.gov%2Fcaffeine&rut=abc";
        assert_eq!(resolve_result_url(href), "https://www.nih.gov/caffeine");
    }

    #[test]
    fn resolves_relative_redirect_wrapper() {
        let href = "/l/?uddg=https%3A%2F%2Fexample.org%2Fpage";
        assert_eq!(resolve_result_url(href), "https://example.org/page");
    }

    #[test]
    fn normalizes_scheme_relative_and_bare_hosts() {
        assert_eq!(resolve_result_url("//example.com/a"), "https://example.com/a");
        assert_eq!(resolve_result_url("https://example.com/b"), "https://example.com/b");
        assert_eq!(resolve_result_url("example.com/c"), "https://example.com/c");
    }

    #[test]
    fn parses_result_anchors_with_bound() {
        let html = r#"
            <a class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fa.org%2F1">First <b>hit</b></a>
            <a class="result__a" href="https://b.org/2">Second</a>
            <a class="other" href="https://ignored.org">Nope</a>
            <a class="result__a" href="https://c.org/3">Third</a>
        "#;
        let hits = parse_result_anchors(html, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "First hit");
        assert_eq!(hits[0].url, "https://a.org/1");
        assert_eq!(hits[1].url, "https://b.org/2");
    }

    #[test]
    fn truncate_chars_respects_utf8() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("short", 100), "short");
    }

    struct FlakyFetcher;

    #[async_trait]
    impl PageFetcher for FlakyFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            if url.contains("bad") {
                anyhow::bail!("connection refused");
            }
            Ok(format!("<p>content for {}</p>", url))
        }
    }

    fn src(title: &str, url: &str) -> SourceRef {
        SourceRef {
            title: title.to_string(),
            url: Some(url.to_string()),
            score: None,
        }
    }

    #[tokio::test]
    async fn failing_url_does_not_abort_batch() {
        let sources = vec![
            src("ok one", "https://a.org/ok"),
            src("broken", "https://b.org/bad"),
            src("ok two", "https://c.org/ok"),
        ];
        let docs = fetch_extracted(&FlakyFetcher, &sources, 10, 2, 20_000).await;
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].id, "https://a.org/ok");
        assert_eq!(docs[1].id, "https://c.org/ok");
    }

    #[tokio::test]
    async fn fetch_limit_is_enforced() {
        let sources: Vec<SourceRef> = (0..20)
            .map(|i| src(&format!("t{}", i), &format!("https://x.org/{}", i)))
            .collect();
        let docs = fetch_extracted(&FlakyFetcher, &sources, 10, 4, 20_000).await;
        assert_eq!(docs.len(), 10);
    }

    #[tokio::test]
    async fn sources_without_url_are_skipped() {
        let sources = vec![
            SourceRef {
                title: "no url".to_string(),
                url: None,
                score: None,
            },
            src("with url", "https://a.org/p"),
        ];
        let docs = fetch_extracted(&FlakyFetcher, &sources, 10, 2, 20_000).await;
        assert_eq!(docs.len(), 1);
    }
}
