//! Crawler/scraper chain interface.
//!
//! The engine only sees the upstream crawl stack through this trait; the
//! real implementation (headless browser, scrape API, proxies) lives in a
//! separate service.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::error::Result;
use crate::types::page::CrawledPage;

/// Outcome of probing a site's reachability.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    /// The site answered at all
    pub reachable: bool,

    /// The site answered but refused automated access
    pub blocked: bool,

    /// Block mechanism when known ("captcha", "waf", ...)
    pub block_type: Option<String>,
}

impl ProbeResult {
    /// Reachable and unblocked.
    pub fn ok() -> Self {
        Self {
            reachable: true,
            blocked: false,
            block_type: None,
        }
    }

    /// Whether the direct crawler cannot be used.
    pub fn needs_fallback(&self) -> bool {
        !self.reachable || self.blocked
    }
}

/// The probe/discover/scrape capability set.
#[async_trait]
pub trait SiteCrawler: Send + Sync {
    /// Check whether a site is reachable and unblocked.
    async fn probe(&self, url: &str) -> Result<ProbeResult>;

    /// Discover same-site links breadth-first up to the given bounds.
    async fn discover_links(
        &self,
        url: &str,
        max_pages: usize,
        max_depth: usize,
    ) -> Result<Vec<String>>;

    /// Fetch a single page as markdown.
    async fn scrape(&self, url: &str) -> Result<CrawledPage>;

    /// Fetch many pages with bounded concurrency.
    ///
    /// Individual failures are logged and dropped; the call only fails if
    /// the fan-out itself cannot run.
    async fn scrape_all(&self, urls: &[String], concurrency: usize) -> Result<Vec<CrawledPage>> {
        let results: Vec<Option<CrawledPage>> = stream::iter(urls.iter().cloned())
            .map(|url| async move {
                match self.scrape(&url).await {
                    Ok(page) => Some(page),
                    Err(e) => {
                        warn!(url = %url, error = %e, "scrape failed");
                        None
                    }
                }
            })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        Ok(results.into_iter().flatten().collect())
    }
}
