//! Testing utilities including a scripted crawler.
//!
//! The LLM mock lives in `llm_client::MockClient`; this module provides the
//! crawler-side counterpart so pipeline tests run without a network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{IntelError, Result};
use crate::traits::crawler::{ProbeResult, SiteCrawler};
use crate::types::page::CrawledPage;

/// Record of a call made to the mock crawler.
#[derive(Debug, Clone)]
pub enum MockCrawlerCall {
    Probe { url: String },
    DiscoverLinks { url: String },
    Scrape { url: String },
}

/// A scripted crawler.
///
/// Pages are served by exact URL; `discover_links` returns the scripted page
/// URLs in insertion order. Unknown URLs fail like a 404.
#[derive(Default)]
pub struct MockCrawler {
    probe: Arc<RwLock<ProbeResult>>,
    pages: Arc<RwLock<Vec<(String, CrawledPage)>>>,
    scrape_errors: Arc<RwLock<HashMap<String, String>>>,
    calls: Arc<RwLock<Vec<MockCrawlerCall>>>,
}

impl MockCrawler {
    /// A crawler for a reachable, unblocked site with no pages yet.
    pub fn new() -> Self {
        Self {
            probe: Arc::new(RwLock::new(ProbeResult::ok())),
            ..Default::default()
        }
    }

    /// Script a page at its URL.
    pub fn with_page(self, page: CrawledPage) -> Self {
        self.pages
            .write()
            .unwrap()
            .push((page.url.clone(), page));
        self
    }

    /// Script the probe outcome.
    pub fn with_probe(self, probe: ProbeResult) -> Self {
        *self.probe.write().unwrap() = probe;
        self
    }

    /// Report the site as blocked.
    pub fn blocked(self, block_type: &str) -> Self {
        self.with_probe(ProbeResult {
            reachable: true,
            blocked: true,
            block_type: Some(block_type.to_string()),
        })
    }

    /// Report the site as unreachable.
    pub fn unreachable(self) -> Self {
        self.with_probe(ProbeResult::default())
    }

    /// Fail scrapes of a URL with a given error message.
    pub fn with_scrape_error(self, url: impl Into<String>, message: impl Into<String>) -> Self {
        self.scrape_errors
            .write()
            .unwrap()
            .insert(url.into(), message.into());
        self
    }

    /// All calls made against this mock.
    pub fn calls(&self) -> Vec<MockCrawlerCall> {
        self.calls.read().unwrap().clone()
    }

    /// URLs scraped so far.
    pub fn scraped_urls(&self) -> Vec<String> {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter_map(|c| match c {
                MockCrawlerCall::Scrape { url } => Some(url.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: MockCrawlerCall) {
        self.calls.write().unwrap().push(call);
    }
}

#[async_trait]
impl SiteCrawler for MockCrawler {
    async fn probe(&self, url: &str) -> Result<ProbeResult> {
        self.record(MockCrawlerCall::Probe {
            url: url.to_string(),
        });
        Ok(self.probe.read().unwrap().clone())
    }

    async fn discover_links(
        &self,
        url: &str,
        max_pages: usize,
        _max_depth: usize,
    ) -> Result<Vec<String>> {
        self.record(MockCrawlerCall::DiscoverLinks {
            url: url.to_string(),
        });
        Ok(self
            .pages
            .read()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .take(max_pages)
            .collect())
    }

    async fn scrape(&self, url: &str) -> Result<CrawledPage> {
        self.record(MockCrawlerCall::Scrape {
            url: url.to_string(),
        });

        if let Some(message) = self.scrape_errors.read().unwrap().get(url) {
            return Err(IntelError::Crawl(message.clone()));
        }

        self.pages
            .read()
            .unwrap()
            .iter()
            .find(|(page_url, _)| page_url == url)
            .map(|(_, page)| page.clone())
            .ok_or_else(|| IntelError::Crawl(format!("404 page not found: {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_crawler_serves_scripted_pages() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://x.com/", "home"))
            .with_page(CrawledPage::new("https://x.com/team", "people"));

        let urls = crawler.discover_links("https://x.com", 50, 2).await.unwrap();
        assert_eq!(urls.len(), 2);

        let page = crawler.scrape("https://x.com/team").await.unwrap();
        assert_eq!(page.markdown, "people");

        assert!(crawler.scrape("https://x.com/missing").await.is_err());
        assert_eq!(crawler.scraped_urls().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_crawler_scrape_all_drops_failures() {
        let crawler = MockCrawler::new()
            .with_page(CrawledPage::new("https://x.com/a", "a"))
            .with_scrape_error("https://x.com/b", "i/o timeout");

        let urls = vec!["https://x.com/a".to_string(), "https://x.com/b".to_string()];
        let pages = crawler.scrape_all(&urls, 10).await.unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].url, "https://x.com/a");
    }
}
