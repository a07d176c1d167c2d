//! The store contract.
//!
//! Persistence is split into focused traits; `Store` is the composite the
//! engine is generic over (blanket-implemented, so any backend providing the
//! parts is a `Store`). Backends must agree on observable behavior:
//! `NotFound` on lookups is `Ok(None)`, `NotFound` on updates is an error,
//! and all structured values live in single JSON columns.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{
    Answer, Checkpoint, ClassifiedPage, Company, DeadLetterEntry, DlqFilter, Firm, FirmRun,
    FirmRunStats, ResultAnswer, Run, RunError, RunFilter, RunPhase, RunResult, RunStatus,
};

/// SHA-256 hex key for the per-URL scrape cache.
pub fn url_hash(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A cached whole-site crawl.
#[derive(Debug, Clone)]
pub struct CrawlCacheEntry {
    pub company_url: String,
    pub pages: Vec<ClassifiedPage>,
    pub crawled_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// A PE crawl cache row, unique on `(firm_id, url)`.
#[derive(Debug, Clone)]
pub struct FirmCrawlRow {
    pub firm_id: i64,
    pub page: ClassifiedPage,
    pub crawled_at: DateTime<Utc>,
}

/// Generic pipeline runs and phases.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Create a queued run for a company.
    async fn create_run(&self, company: &Company) -> Result<Run>;

    /// Move a run to a new status.
    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<()>;

    /// Store a result and mark the run complete.
    async fn update_run_result(&self, run_id: Uuid, result: &RunResult) -> Result<()>;

    /// Mark a run failed with an error record.
    async fn fail_run(&self, run_id: Uuid, error: &RunError) -> Result<()>;

    /// Fetch a run by id.
    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>>;

    /// List runs matching a filter, newest first.
    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>>;

    /// Start a named phase under a run.
    async fn create_phase(&self, run_id: Uuid, name: &str) -> Result<RunPhase>;

    /// Complete a phase with its result payload.
    async fn complete_phase(&self, phase_id: Uuid, result: &serde_json::Value) -> Result<()>;

    /// Answers from the most recent complete run for a company URL meeting
    /// the confidence floor, excluding runs older than `max_age` when given.
    async fn high_confidence_answers(
        &self,
        company_url: &str,
        min_confidence: f64,
        max_age: Option<Duration>,
    ) -> Result<Vec<ResultAnswer>>;
}

/// TTL caches: whole-site crawls, per-URL scrapes, LinkedIn lookups.
///
/// A get past expiry returns nothing; `delete_expired_*` removes only rows
/// with `expires_at <= now` and reports how many went.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_cached_crawl(&self, company_url: &str) -> Result<Option<CrawlCacheEntry>>;
    async fn set_cached_crawl(
        &self,
        company_url: &str,
        pages: &[ClassifiedPage],
        ttl: Duration,
    ) -> Result<()>;
    async fn delete_expired_crawls(&self) -> Result<u64>;

    async fn get_cached_scrape(&self, url: &str) -> Result<Option<String>>;
    async fn set_cached_scrape(&self, url: &str, content: &str, ttl: Duration) -> Result<()>;
    async fn delete_expired_scrapes(&self) -> Result<u64>;

    async fn get_cached_linkedin(&self, domain: &str) -> Result<Option<serde_json::Value>>;
    async fn set_cached_linkedin(
        &self,
        domain: &str,
        data: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()>;
    async fn delete_expired_linkedin(&self) -> Result<u64>;
}

/// Phase checkpoints, one per entity (save overwrites).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_checkpoint(&self, entity_id: &str, phase: &str, data: &[u8]) -> Result<()>;
    async fn load_checkpoint(&self, entity_id: &str) -> Result<Option<Checkpoint>>;
    async fn delete_checkpoint(&self, entity_id: &str) -> Result<()>;
}

/// Dead-letter queue.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Insert or replace by id.
    async fn enqueue_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()>;

    /// Entries with `next_retry_at <= now` and retries remaining, ordered by
    /// `next_retry_at` ascending.
    async fn dequeue_dead_letters(&self, filter: &DlqFilter) -> Result<Vec<DeadLetterEntry>>;

    /// Bump the retry count; must affect exactly one row.
    async fn increment_dead_letter_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()>;

    /// Drop an entry.
    async fn remove_dead_letter(&self, id: &str) -> Result<()>;

    /// Queue depth.
    async fn count_dead_letters(&self) -> Result<u64>;
}

/// PE firm records, their crawl cache, runs, and answers.
#[async_trait]
pub trait FirmStore: Send + Sync {
    /// Idempotent upsert keyed on `name`; fields never regress to null.
    async fn upsert_firm(&self, firm: &Firm) -> Result<Firm>;

    async fn get_firm(&self, firm_id: i64) -> Result<Option<Firm>>;

    async fn get_firm_by_name(&self, name: &str) -> Result<Option<Firm>>;

    /// Link a firm to an SEC CRD number (unique per pair).
    async fn add_firm_crd(&self, firm_id: i64, crd_number: &str) -> Result<()>;

    /// Cached pages for a firm, any age; freshness is the caller's call.
    async fn get_firm_crawl_cache(&self, firm_id: i64) -> Result<Vec<FirmCrawlRow>>;

    /// Upsert pages keyed on `(firm_id, url)`.
    async fn upsert_firm_crawl_cache(
        &self,
        firm_id: i64,
        pages: &[ClassifiedPage],
    ) -> Result<()>;

    /// Create a running extraction run for a firm.
    async fn create_firm_run(&self, firm_id: i64) -> Result<FirmRun>;

    /// Close a run as complete with its stats.
    async fn complete_firm_run(&self, run_id: i64, stats: &FirmRunStats) -> Result<()>;

    /// Close a run as failed.
    async fn fail_firm_run(&self, run_id: i64, error: &str) -> Result<()>;

    /// Close a run as skipped with a reason.
    async fn skip_firm_run(&self, run_id: i64, reason: &str) -> Result<()>;

    async fn get_firm_run(&self, run_id: i64) -> Result<Option<FirmRun>>;

    /// Bulk upsert keyed on `(firm_id, question_key)`.
    async fn upsert_answers(&self, answers: &[Answer]) -> Result<()>;

    async fn answers_for_firm(&self, firm_id: i64) -> Result<Vec<Answer>>;

    /// Refresh the denormalized answer view. Backends without one no-op.
    async fn refresh_answer_view(&self, concurrent: bool) -> Result<()> {
        let _ = concurrent;
        Ok(())
    }
}

/// Read side of the upstream filings-sync job log.
#[async_trait]
pub trait SyncLogStore: Send + Sync {
    async fn log_fedsync(&self, source: &str, status: &str, detail: Option<&str>) -> Result<()>;

    /// Counts by status since a cutoff.
    async fn fedsync_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>>;
}

/// Connection lifecycle.
#[async_trait]
pub trait StoreLifecycle: Send + Sync {
    /// Verify connectivity.
    async fn ping(&self) -> Result<()>;

    /// Apply schema; safe to call repeatedly.
    async fn migrate(&self) -> Result<()>;

    /// Release connections.
    async fn close(&self);
}

/// The composite contract the engine is generic over.
pub trait Store:
    RunStore
    + CacheStore
    + CheckpointStore
    + DeadLetterStore
    + FirmStore
    + SyncLogStore
    + StoreLifecycle
{
}

// Blanket implementation: anything providing all parts is a Store.
impl<T> Store for T where
    T: RunStore
        + CacheStore
        + CheckpointStore
        + DeadLetterStore
        + FirmStore
        + SyncLogStore
        + StoreLifecycle
{
}
