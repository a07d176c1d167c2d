//! # Firm Intel
//!
//! A competitive-intelligence extraction engine for private-equity firm
//! websites, driven by a tiered LLM pipeline.
//!
//! ## Architecture
//!
//! ```text
//! CRAWL → CLASSIFY → ROUTE → TIER-1 → ESCALATE → TIER-2 → MERGE → PERSIST
//!
//! 1. SiteCrawler fetches pages (probe / discover / scrape chain)
//! 2. Classifier tags each page by URL path → ClassifiedPage
//! 3. Router assembles per-question context from preferred page types
//! 4. BatchExecutor answers tier-1 questions on the cheap model
//! 5. Low-confidence answers escalate into the tier-2 synthesis pass
//! 6. Answers merge (higher tier wins, then higher confidence) and persist
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use firm_intel::{Extractor, ExtractorConfig, MemoryStore};
//! use llm_client::AnthropicClient;
//!
//! let store = Arc::new(MemoryStore::new());
//! let crawler = Arc::new(my_crawler);
//! let client = Arc::new(AnthropicClient::from_env()?);
//!
//! let extractor = Extractor::new(store, crawler, client, ExtractorConfig::default());
//! let report = extractor.run_firm(firm_id).await?;
//! println!("{} answers, ${:.2}", report.stats.answers_extracted, report.stats.cost_usd);
//! ```
//!
//! ## Modules
//!
//! - [`traits`] - Core abstractions (Store, SiteCrawler)
//! - [`types`] - Domain types (Firm, Question, Answer, runs, DLQ)
//! - [`classify`] / [`router`] - Page classification and context routing
//! - [`llm`] - Batch executor, prompt-cache primer, response repair
//! - [`resilience`] - Retry, circuit breaker
//! - [`pipeline`] - The per-firm orchestrator, prompts, cost tracking
//! - [`stores`] - Storage backends (memory, sqlite, postgres)
//! - [`monitor`] - Metrics collection and threshold alerting
//! - [`testing`] - Mock crawler for tests

pub mod classify;
pub mod error;
pub mod llm;
pub mod monitor;
pub mod pipeline;
pub mod resilience;
pub mod router;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{is_transient, is_transient_http_status, IntelError, Result};
pub use pipeline::{CostEstimate, Extractor, FirmRunReport, PROBE_PATHS, SKIP_REASON_NO_PAGES};
pub use traits::{
    crawler::{ProbeResult, SiteCrawler},
    store::{Store, StoreLifecycle},
};
pub use types::{
    Answer, ClassifiedPage, Company, CrawledPage, DeadLetterEntry, ErrorType, ExtractorConfig,
    Firm, FirmDocs, FirmRun, FirmRunStats, FirmSource, MonitorConfig, PageType, Question,
    QuestionCatalog, Run, RunStatus, Tier,
};

// Re-export classification and routing helpers
pub use classify::{classify_page, classify_url, url_year};
pub use router::{route_context, BLOG_CONTEXT_CHAR_BUDGET, CONTEXT_CHAR_BUDGET};

// Re-export resilience primitives
pub use resilience::{
    retry, BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, RetryConfig,
};

// Re-export executor surface
pub use llm::{BatchConfig, BatchExecutor, BatchItem, BatchOutcome};

// Re-export stores
pub use stores::MemoryStore;

#[cfg(feature = "sqlite")]
pub use stores::SqliteStore;

#[cfg(feature = "postgres")]
pub use stores::PostgresStore;

// Re-export monitoring
pub use monitor::{Alert, AlertThresholds, Checker, MetricsCollector, PipelineMetrics};

// Re-export testing utilities
pub use testing::{MockCrawler, MockCrawlerCall};
