//! Core trait abstractions.

pub mod crawler;
pub mod store;

pub use crawler::{ProbeResult, SiteCrawler};
pub use store::{
    url_hash, CacheStore, CheckpointStore, CrawlCacheEntry, DeadLetterStore, FirmCrawlRow,
    FirmStore, RunStore, Store, StoreLifecycle, SyncLogStore,
};
