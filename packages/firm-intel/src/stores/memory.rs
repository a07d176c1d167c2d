//! In-memory store.
//!
//! Implements the full store contract over hash maps. Used by tests and by
//! short-lived tooling that does not need durability.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::error::{IntelError, Result};
use crate::traits::store::{
    url_hash, CacheStore, CheckpointStore, CrawlCacheEntry, DeadLetterStore, FirmCrawlRow,
    FirmStore, RunStore, StoreLifecycle, SyncLogStore,
};
use crate::types::{
    Answer, Checkpoint, ClassifiedPage, Company, DeadLetterEntry, DlqFilter, Firm, FirmRun,
    FirmRunStats, ResultAnswer, Run, RunError, RunFilter, RunPhase, RunResult, RunStatus,
};

#[derive(Default)]
struct Inner {
    runs: HashMap<Uuid, Run>,
    phases: HashMap<Uuid, RunPhase>,
    crawl_cache: HashMap<String, CrawlCacheEntry>,
    scrape_cache: HashMap<String, (String, DateTime<Utc>)>,
    linkedin_cache: HashMap<String, (serde_json::Value, DateTime<Utc>)>,
    checkpoints: HashMap<String, Checkpoint>,
    dead_letters: HashMap<String, DeadLetterEntry>,
    firms: HashMap<i64, Firm>,
    firm_crds: Vec<(i64, String)>,
    firm_crawl: HashMap<(i64, String), FirmCrawlRow>,
    firm_runs: HashMap<i64, FirmRun>,
    next_firm_run_id: i64,
    next_firm_id: i64,
    answers: HashMap<(i64, String), Answer>,
    fedsync: Vec<(String, String, Option<String>, DateTime<Utc>)>,
}

/// Hash-map backed store.
#[derive(Default, Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunStore for MemoryStore {
    async fn create_run(&self, company: &Company) -> Result<Run> {
        let now = Utc::now();
        let run = Run {
            id: Uuid::new_v4(),
            company: company.clone(),
            status: RunStatus::Queued,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.inner.write().unwrap().runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn update_run_status(&self, run_id: Uuid, status: RunStatus) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let run = inner.runs.get_mut(&run_id).ok_or(IntelError::NotFound {
            entity: format!("run {run_id}"),
        })?;
        run.status = status;
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn update_run_result(&self, run_id: Uuid, result: &RunResult) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let run = inner.runs.get_mut(&run_id).ok_or(IntelError::NotFound {
            entity: format!("run {run_id}"),
        })?;
        run.status = RunStatus::Complete;
        run.result = Some(result.clone());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn fail_run(&self, run_id: Uuid, error: &RunError) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let run = inner.runs.get_mut(&run_id).ok_or(IntelError::NotFound {
            entity: format!("run {run_id}"),
        })?;
        run.status = RunStatus::Failed;
        run.error = Some(error.clone());
        run.updated_at = Utc::now();
        Ok(())
    }

    async fn get_run(&self, run_id: Uuid) -> Result<Option<Run>> {
        Ok(self.inner.read().unwrap().runs.get(&run_id).cloned())
    }

    async fn list_runs(&self, filter: &RunFilter) -> Result<Vec<Run>> {
        let inner = self.inner.read().unwrap();
        let mut runs: Vec<Run> = inner
            .runs
            .values()
            .filter(|run| {
                filter.status.map_or(true, |s| run.status == s)
                    && filter
                        .company_url
                        .as_ref()
                        .map_or(true, |url| run.company.url.as_deref() == Some(url.as_str()))
                    && filter.error_category.as_ref().map_or(true, |category| {
                        run.error.as_ref().map(|e| e.category.as_str()) == Some(category.as_str())
                    })
                    && filter
                        .created_after
                        .map_or(true, |after| run.created_at >= after)
            })
            .cloned()
            .collect();

        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = filter.offset.unwrap_or(0);
        Ok(runs
            .into_iter()
            .skip(offset)
            .take(filter.effective_limit())
            .collect())
    }

    async fn create_phase(&self, run_id: Uuid, name: &str) -> Result<RunPhase> {
        let phase = RunPhase {
            id: Uuid::new_v4(),
            run_id,
            name: name.to_string(),
            status: RunStatus::Running,
            result: None,
            started_at: Utc::now(),
        };
        self.inner
            .write()
            .unwrap()
            .phases
            .insert(phase.id, phase.clone());
        Ok(phase)
    }

    async fn complete_phase(&self, phase_id: Uuid, result: &serde_json::Value) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let phase = inner.phases.get_mut(&phase_id).ok_or(IntelError::NotFound {
            entity: format!("phase {phase_id}"),
        })?;
        phase.status = RunStatus::Complete;
        phase.result = Some(result.clone());
        Ok(())
    }

    async fn high_confidence_answers(
        &self,
        company_url: &str,
        min_confidence: f64,
        max_age: Option<Duration>,
    ) -> Result<Vec<ResultAnswer>> {
        let inner = self.inner.read().unwrap();
        let cutoff = max_age.map(|age| Utc::now() - age);

        let latest = inner
            .runs
            .values()
            .filter(|run| {
                run.status == RunStatus::Complete
                    && run.company.url.as_deref() == Some(company_url)
                    && cutoff.map_or(true, |c| run.created_at >= c)
            })
            .max_by_key(|run| run.created_at);

        Ok(latest
            .and_then(|run| run.result.as_ref())
            .map(|result| {
                result
                    .answers
                    .iter()
                    .filter(|a| a.confidence >= min_confidence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_cached_crawl(&self, company_url: &str) -> Result<Option<CrawlCacheEntry>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .crawl_cache
            .get(company_url)
            .filter(|entry| entry.expires_at > Utc::now())
            .cloned())
    }

    async fn set_cached_crawl(
        &self,
        company_url: &str,
        pages: &[ClassifiedPage],
        ttl: Duration,
    ) -> Result<()> {
        let now = Utc::now();
        self.inner.write().unwrap().crawl_cache.insert(
            company_url.to_string(),
            CrawlCacheEntry {
                company_url: company_url.to_string(),
                pages: pages.to_vec(),
                crawled_at: now,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn delete_expired_crawls(&self) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        let before = inner.crawl_cache.len();
        inner.crawl_cache.retain(|_, entry| entry.expires_at > now);
        Ok((before - inner.crawl_cache.len()) as u64)
    }

    async fn get_cached_scrape(&self, url: &str) -> Result<Option<String>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .scrape_cache
            .get(&url_hash(url))
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(content, _)| content.clone()))
    }

    async fn set_cached_scrape(&self, url: &str, content: &str, ttl: Duration) -> Result<()> {
        self.inner
            .write()
            .unwrap()
            .scrape_cache
            .insert(url_hash(url), (content.to_string(), Utc::now() + ttl));
        Ok(())
    }

    async fn delete_expired_scrapes(&self) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        let before = inner.scrape_cache.len();
        inner.scrape_cache.retain(|_, (_, expires)| *expires > now);
        Ok((before - inner.scrape_cache.len()) as u64)
    }

    async fn get_cached_linkedin(&self, domain: &str) -> Result<Option<serde_json::Value>> {
        let inner = self.inner.read().unwrap();
        Ok(inner
            .linkedin_cache
            .get(domain)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(data, _)| data.clone()))
    }

    async fn set_cached_linkedin(
        &self,
        domain: &str,
        data: &serde_json::Value,
        ttl: Duration,
    ) -> Result<()> {
        self.inner
            .write()
            .unwrap()
            .linkedin_cache
            .insert(domain.to_string(), (data.clone(), Utc::now() + ttl));
        Ok(())
    }

    async fn delete_expired_linkedin(&self) -> Result<u64> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        let before = inner.linkedin_cache.len();
        inner.linkedin_cache.retain(|_, (_, expires)| *expires > now);
        Ok((before - inner.linkedin_cache.len()) as u64)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn save_checkpoint(&self, entity_id: &str, phase: &str, data: &[u8]) -> Result<()> {
        self.inner.write().unwrap().checkpoints.insert(
            entity_id.to_string(),
            Checkpoint::new(entity_id, phase, data.to_vec()),
        );
        Ok(())
    }

    async fn load_checkpoint(&self, entity_id: &str) -> Result<Option<Checkpoint>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .checkpoints
            .get(entity_id)
            .cloned())
    }

    async fn delete_checkpoint(&self, entity_id: &str) -> Result<()> {
        self.inner.write().unwrap().checkpoints.remove(entity_id);
        Ok(())
    }
}

#[async_trait]
impl DeadLetterStore for MemoryStore {
    async fn enqueue_dead_letter(&self, entry: &DeadLetterEntry) -> Result<()> {
        self.inner
            .write()
            .unwrap()
            .dead_letters
            .insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn dequeue_dead_letters(&self, filter: &DlqFilter) -> Result<Vec<DeadLetterEntry>> {
        let inner = self.inner.read().unwrap();
        let now = Utc::now();
        let mut entries: Vec<DeadLetterEntry> = inner
            .dead_letters
            .values()
            .filter(|entry| {
                entry.next_retry_at <= now
                    && entry.can_retry()
                    && filter.error_type.map_or(true, |t| entry.error_type == t)
            })
            .cloned()
            .collect();

        entries.sort_by(|a, b| a.next_retry_at.cmp(&b.next_retry_at));
        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn increment_dead_letter_retry(
        &self,
        id: &str,
        next_retry_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let entry = inner.dead_letters.get_mut(id).ok_or(IntelError::NotFound {
            entity: format!("dead letter {id}"),
        })?;
        entry.retry_count += 1;
        entry.next_retry_at = next_retry_at;
        entry.last_failed_at = Utc::now();
        entry.error = last_error.to_string();
        Ok(())
    }

    async fn remove_dead_letter(&self, id: &str) -> Result<()> {
        self.inner.write().unwrap().dead_letters.remove(id);
        Ok(())
    }

    async fn count_dead_letters(&self) -> Result<u64> {
        Ok(self.inner.read().unwrap().dead_letters.len() as u64)
    }
}

#[async_trait]
impl FirmStore for MemoryStore {
    async fn upsert_firm(&self, firm: &Firm) -> Result<Firm> {
        let mut inner = self.inner.write().unwrap();

        let existing_id = inner
            .firms
            .values()
            .find(|f| f.name == firm.name)
            .map(|f| f.firm_id);

        match existing_id {
            Some(id) => {
                let stored = inner.firms.get_mut(&id).expect("indexed firm exists");
                stored.merge_update(firm);
                Ok(stored.clone())
            }
            None => {
                let mut stored = firm.clone();
                if stored.firm_id == 0 {
                    inner.next_firm_id += 1;
                    stored.firm_id = inner.next_firm_id;
                }
                stored.updated_at = Utc::now();
                inner.firms.insert(stored.firm_id, stored.clone());
                Ok(stored)
            }
        }
    }

    async fn get_firm(&self, firm_id: i64) -> Result<Option<Firm>> {
        Ok(self.inner.read().unwrap().firms.get(&firm_id).cloned())
    }

    async fn get_firm_by_name(&self, name: &str) -> Result<Option<Firm>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .firms
            .values()
            .find(|f| f.name == name)
            .cloned())
    }

    async fn add_firm_crd(&self, firm_id: i64, crd_number: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let pair = (firm_id, crd_number.to_string());
        if !inner.firm_crds.contains(&pair) {
            inner.firm_crds.push(pair);
        }
        Ok(())
    }

    async fn get_firm_crawl_cache(&self, firm_id: i64) -> Result<Vec<FirmCrawlRow>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .firm_crawl
            .values()
            .filter(|row| row.firm_id == firm_id)
            .cloned()
            .collect())
    }

    async fn upsert_firm_crawl_cache(
        &self,
        firm_id: i64,
        pages: &[ClassifiedPage],
    ) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let now = Utc::now();
        for page in pages {
            inner.firm_crawl.insert(
                (firm_id, page.url.clone()),
                FirmCrawlRow {
                    firm_id,
                    page: page.clone(),
                    crawled_at: now,
                },
            );
        }
        Ok(())
    }

    async fn create_firm_run(&self, firm_id: i64) -> Result<FirmRun> {
        let mut inner = self.inner.write().unwrap();
        inner.next_firm_run_id += 1;
        let run = FirmRun {
            id: inner.next_firm_run_id,
            firm_id,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            stats: None,
            error_message: None,
        };
        inner.firm_runs.insert(run.id, run.clone());
        Ok(run)
    }

    async fn complete_firm_run(&self, run_id: i64, stats: &FirmRunStats) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let run = inner.firm_runs.get_mut(&run_id).ok_or(IntelError::NotFound {
            entity: format!("firm run {run_id}"),
        })?;
        run.status = RunStatus::Complete;
        run.stats = Some(stats.clone());
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail_firm_run(&self, run_id: i64, error: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let run = inner.firm_runs.get_mut(&run_id).ok_or(IntelError::NotFound {
            entity: format!("firm run {run_id}"),
        })?;
        run.status = RunStatus::Failed;
        run.error_message = Some(error.to_string());
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn skip_firm_run(&self, run_id: i64, reason: &str) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        let run = inner.firm_runs.get_mut(&run_id).ok_or(IntelError::NotFound {
            entity: format!("firm run {run_id}"),
        })?;
        run.status = RunStatus::Skipped;
        run.error_message = Some(reason.to_string());
        run.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get_firm_run(&self, run_id: i64) -> Result<Option<FirmRun>> {
        Ok(self.inner.read().unwrap().firm_runs.get(&run_id).cloned())
    }

    async fn upsert_answers(&self, answers: &[Answer]) -> Result<()> {
        let mut inner = self.inner.write().unwrap();
        for answer in answers {
            inner.answers.insert(
                (answer.firm_id, answer.question_key.clone()),
                answer.clone(),
            );
        }
        Ok(())
    }

    async fn answers_for_firm(&self, firm_id: i64) -> Result<Vec<Answer>> {
        Ok(self
            .inner
            .read()
            .unwrap()
            .answers
            .values()
            .filter(|a| a.firm_id == firm_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SyncLogStore for MemoryStore {
    async fn log_fedsync(&self, source: &str, status: &str, detail: Option<&str>) -> Result<()> {
        self.inner.write().unwrap().fedsync.push((
            source.to_string(),
            status.to_string(),
            detail.map(String::from),
            Utc::now(),
        ));
        Ok(())
    }

    async fn fedsync_counts(&self, since: DateTime<Utc>) -> Result<HashMap<String, i64>> {
        let inner = self.inner.read().unwrap();
        let mut counts = HashMap::new();
        for (_, status, _, at) in &inner.fedsync {
            if *at >= since {
                *counts.entry(status.clone()).or_insert(0) += 1;
            }
        }
        Ok(counts)
    }
}

#[async_trait]
impl StoreLifecycle for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn migrate(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorType, FirmSource, PageType};

    fn store() -> MemoryStore {
        MemoryStore::new()
    }

    fn page(url: &str) -> ClassifiedPage {
        ClassifiedPage {
            url: url.into(),
            title: "T".into(),
            markdown: "content".into(),
            status_code: 200,
            page_type: PageType::About,
        }
    }

    #[tokio::test]
    async fn test_run_lifecycle() {
        let store = store();
        let run = store
            .create_run(&Company::new("Summit Ridge").with_url("https://sr.example"))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Queued);

        store
            .update_run_status(run.id, RunStatus::Running)
            .await
            .unwrap();
        store
            .update_run_result(run.id, &RunResult::default())
            .await
            .unwrap();

        let fetched = store.get_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Complete);

        // Updates on a missing run are errors; lookups are not.
        assert!(store
            .update_run_status(Uuid::new_v4(), RunStatus::Running)
            .await
            .is_err());
        assert!(store.get_run(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_runs_filters_and_order() {
        let store = store();
        for i in 0..3 {
            let run = store
                .create_run(&Company::new(format!("Firm {i}")).with_url("https://a.example"))
                .await
                .unwrap();
            if i == 0 {
                store
                    .fail_run(
                        run.id,
                        &RunError {
                            message: "boom".into(),
                            category: "transient".into(),
                        },
                    )
                    .await
                    .unwrap();
            }
        }
        store
            .create_run(&Company::new("Other").with_url("https://b.example"))
            .await
            .unwrap();

        let by_url = store
            .list_runs(&RunFilter {
                company_url: Some("https://a.example".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_url.len(), 3);
        // Newest first
        assert!(by_url.windows(2).all(|w| w[0].created_at >= w[1].created_at));

        let failed = store
            .list_runs(&RunFilter {
                status: Some(RunStatus::Failed),
                error_category: Some("transient".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(failed.len(), 1);

        let limited = store
            .list_runs(&RunFilter {
                limit: Some(2),
                offset: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[tokio::test]
    async fn test_high_confidence_answers() {
        let store = store();
        let run = store
            .create_run(&Company::new("Firm").with_url("https://a.example"))
            .await
            .unwrap();
        store
            .update_run_result(
                run.id,
                &RunResult {
                    cost_usd: 0.1,
                    score: 0.8,
                    answers: vec![
                        ResultAnswer {
                            question_key: "pe_aum".into(),
                            value: serde_json::json!("$1B"),
                            confidence: 0.9,
                        },
                        ResultAnswer {
                            question_key: "pe_team_size".into(),
                            value: serde_json::json!(12),
                            confidence: 0.3,
                        },
                    ],
                },
            )
            .await
            .unwrap();

        let answers = store
            .high_confidence_answers("https://a.example", 0.7, None)
            .await
            .unwrap();
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].question_key, "pe_aum");

        let none = store
            .high_confidence_answers("https://a.example", 0.7, Some(Duration::seconds(-1)))
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_crawl_cache_ttl() {
        let store = store();
        let pages = vec![page("https://a.example/about")];

        store
            .set_cached_crawl("https://a.example", &pages, Duration::days(7))
            .await
            .unwrap();
        let hit = store.get_cached_crawl("https://a.example").await.unwrap();
        assert_eq!(hit.unwrap().pages.len(), 1);

        // An already-expired entry is invisible and reaped.
        store
            .set_cached_crawl("https://b.example", &pages, Duration::seconds(-1))
            .await
            .unwrap();
        assert!(store
            .get_cached_crawl("https://b.example")
            .await
            .unwrap()
            .is_none());
        assert_eq!(store.delete_expired_crawls().await.unwrap(), 1);
        assert!(store
            .get_cached_crawl("https://a.example")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_scrape_cache_keyed_by_hash() {
        let store = store();
        store
            .set_cached_scrape("https://a.example/team", "markdown", Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(
            store
                .get_cached_scrape("https://a.example/team")
                .await
                .unwrap()
                .as_deref(),
            Some("markdown")
        );
        assert!(store
            .get_cached_scrape("https://a.example/other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_overwrite() {
        let store = store();
        store
            .save_checkpoint("pe-firm-1", "tier1", b"first")
            .await
            .unwrap();
        store
            .save_checkpoint("pe-firm-1", "tier1", b"second")
            .await
            .unwrap();

        let loaded = store.load_checkpoint("pe-firm-1").await.unwrap().unwrap();
        assert_eq!(loaded.data, b"second");

        store.delete_checkpoint("pe-firm-1").await.unwrap();
        assert!(store.load_checkpoint("pe-firm-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dead_letter_queue_semantics() {
        let store = store();
        let due = DeadLetterEntry::new(
            "pe-firm-1",
            serde_json::json!({"firm_id": 1}),
            "timeout",
            ErrorType::Transient,
        );
        let future = DeadLetterEntry::new(
            "pe-firm-2",
            serde_json::json!({"firm_id": 2}),
            "timeout",
            ErrorType::Transient,
        )
        .with_next_retry_at(Utc::now() + Duration::hours(1));
        let permanent = DeadLetterEntry::new(
            "pe-firm-3",
            serde_json::json!({"firm_id": 3}),
            "bad input",
            ErrorType::Permanent,
        );

        for entry in [&due, &future, &permanent] {
            store.enqueue_dead_letter(entry).await.unwrap();
        }
        assert_eq!(store.count_dead_letters().await.unwrap(), 3);

        let transient_due = store
            .dequeue_dead_letters(&DlqFilter {
                error_type: Some(ErrorType::Transient),
                limit: None,
            })
            .await
            .unwrap();
        assert_eq!(transient_due.len(), 1);
        assert_eq!(transient_due[0].id, "pe-firm-1");

        store
            .increment_dead_letter_retry("pe-firm-1", Utc::now() - Duration::seconds(1), "again")
            .await
            .unwrap();
        let entry = store
            .dequeue_dead_letters(&DlqFilter::default())
            .await
            .unwrap()
            .into_iter()
            .find(|e| e.id == "pe-firm-1")
            .unwrap();
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.error, "again");

        // Exhausted entries stop dequeuing.
        for _ in 0..2 {
            store
                .increment_dead_letter_retry(
                    "pe-firm-1",
                    Utc::now() - Duration::seconds(1),
                    "again",
                )
                .await
                .unwrap();
        }
        let remaining = store
            .dequeue_dead_letters(&DlqFilter {
                error_type: Some(ErrorType::Transient),
                limit: None,
            })
            .await
            .unwrap();
        assert!(remaining.iter().all(|e| e.id != "pe-firm-1"));

        store.remove_dead_letter("pe-firm-1").await.unwrap();
        assert_eq!(store.count_dead_letters().await.unwrap(), 2);

        assert!(store
            .increment_dead_letter_retry("missing", Utc::now(), "x")
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_firm_upsert_keyed_on_name() {
        let store = store();
        let created = store
            .upsert_firm(
                &Firm::new(0, "Summit Ridge Capital", FirmSource::AdvFirms)
                    .with_website("https://sr.example"),
            )
            .await
            .unwrap();
        assert!(created.firm_id > 0);

        // Same name, no website: id and website survive.
        let merged = store
            .upsert_firm(&Firm::new(0, "Summit Ridge Capital", FirmSource::Edgar))
            .await
            .unwrap();
        assert_eq!(merged.firm_id, created.firm_id);
        assert_eq!(merged.website_url.as_deref(), Some("https://sr.example"));

        let by_name = store
            .get_firm_by_name("Summit Ridge Capital")
            .await
            .unwrap();
        assert!(by_name.is_some());
    }

    #[tokio::test]
    async fn test_answers_unique_per_firm_and_key() {
        let store = store();
        let answer = |confidence: f64| Answer {
            firm_id: 1,
            question_key: "pe_aum".into(),
            value: serde_json::json!("$1B"),
            confidence,
            tier: crate::types::Tier::One,
            reasoning: None,
            source_page_type: None,
            model: "m".into(),
            input_tokens: 0,
            output_tokens: 0,
            run_id: 1,
        };

        store.upsert_answers(&[answer(0.5)]).await.unwrap();
        store.upsert_answers(&[answer(0.9)]).await.unwrap();

        let answers = store.answers_for_firm(1).await.unwrap();
        assert_eq!(answers.len(), 1);
        assert!((answers[0].confidence - 0.9).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_firm_run_lifecycle() {
        let store = store();
        let run = store.create_firm_run(7).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);

        store
            .complete_firm_run(run.id, &FirmRunStats::default())
            .await
            .unwrap();
        let fetched = store.get_firm_run(run.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Complete);
        assert!(fetched.completed_at.is_some());

        let skipped = store.create_firm_run(7).await.unwrap();
        store.skip_firm_run(skipped.id, "no_pages").await.unwrap();
        let fetched = store.get_firm_run(skipped.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, RunStatus::Skipped);
        assert_eq!(fetched.error_message.as_deref(), Some("no_pages"));
    }

    #[tokio::test]
    async fn test_fedsync_counts() {
        let store = store();
        store.log_fedsync("edgar", "success", None).await.unwrap();
        store.log_fedsync("edgar", "failed", Some("429")).await.unwrap();
        store.log_fedsync("adv", "success", None).await.unwrap();

        let counts = store
            .fedsync_counts(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(counts.get("success"), Some(&2));
        assert_eq!(counts.get("failed"), Some(&1));
    }
}
