//! Configuration for the extraction engine and the monitoring loop.

use serde::{Deserialize, Serialize};

/// Extraction engine options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Highest tier to run (1 or 2)
    pub max_tier: u8,

    /// Per-firm spend ceiling in USD; 0 disables the check
    pub max_cost_per_firm: f64,

    /// Estimate cost and return without mutating state
    pub dry_run: bool,

    /// Ignore the crawl cache and re-crawl
    pub force: bool,

    /// Crawl cache freshness window
    pub crawl_cache_ttl_hours: i64,

    /// Firms processed concurrently in a batch
    pub batch_concurrency: usize,

    /// Tier-1 answers below this confidence are re-asked at tier 2
    pub escalation_threshold: f64,

    /// Model for tier-1 extraction
    pub tier1_model: String,

    /// Model for tier-2 synthesis
    pub tier2_model: String,

    /// Fan-out for the scrape chain
    pub scrape_concurrency: usize,

    /// Link discovery bounds
    pub discover_max_pages: usize,
    pub discover_max_depth: usize,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_tier: 2,
            max_cost_per_firm: 0.0,
            dry_run: false,
            force: false,
            crawl_cache_ttl_hours: 7 * 24,
            batch_concurrency: 3,
            escalation_threshold: 0.4,
            tier1_model: "claude-3-5-haiku-latest".to_string(),
            tier2_model: "claude-sonnet-4-5".to_string(),
            scrape_concurrency: 10,
            discover_max_pages: 50,
            discover_max_depth: 2,
        }
    }
}

impl ExtractorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap extraction at tier 1.
    pub fn tier1_only(mut self) -> Self {
        self.max_tier = 1;
        self
    }

    /// Set the per-firm budget.
    pub fn with_max_cost_per_firm(mut self, usd: f64) -> Self {
        self.max_cost_per_firm = usd;
        self
    }

    /// Enable dry-run estimation.
    pub fn with_dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    /// Force a fresh crawl.
    pub fn with_force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Set the crawl cache TTL.
    pub fn with_crawl_cache_ttl_hours(mut self, hours: i64) -> Self {
        self.crawl_cache_ttl_hours = hours;
        self
    }

    /// Set batch concurrency.
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    /// Set the escalation threshold.
    pub fn with_escalation_threshold(mut self, threshold: f64) -> Self {
        self.escalation_threshold = threshold;
        self
    }

    /// Crawl cache TTL as a chrono duration.
    pub fn crawl_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.crawl_cache_ttl_hours)
    }
}

/// Monitoring loop options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Failure-rate alert threshold in (0, 1]
    pub failure_rate_threshold: f64,

    /// Cost alert threshold in USD; 0 disables
    pub cost_threshold_usd: f64,

    /// Seconds between checks
    pub check_interval_secs: u64,

    /// How far back the collector scans
    pub lookback_window_hours: i64,

    /// Where alerts are POSTed
    pub webhook_url: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: 0.5,
            cost_threshold_usd: 0.0,
            check_interval_secs: 300,
            lookback_window_hours: 24,
            webhook_url: String::new(),
        }
    }
}

impl MonitorConfig {
    pub fn lookback_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.lookback_window_hours)
    }

    pub fn check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.check_interval_secs)
    }
}
