//! The per-firm extraction orchestrator.
//!
//! Composes the crawler, classifier, document router, batch executor, cost
//! tracker, and store into the full pipeline:
//! crawl → classify → route → tier-1 → escalate → tier-2 → merge → persist.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use llm_client::{Client, Message, MessageRequest, SystemBlock, TokenUsage};

use crate::classify::classify_page;
use crate::error::{is_transient, IntelError, Result};
use crate::llm::{cached_system, BatchConfig, BatchExecutor, BatchItem, ParsedAnswer};
use crate::pipeline::cost::{estimate_batch_cost, CostEstimate, CostTracker, PriceTable};
use crate::pipeline::prompts;
use crate::resilience::{BreakerConfig, BreakerRegistry, CircuitBreaker};
use crate::router::route_context;
use crate::traits::crawler::SiteCrawler;
use crate::traits::store::{
    CacheStore, CheckpointStore, DeadLetterStore, FirmStore, RunStore, Store,
};
use crate::types::answer::{merge_answer, merge_answers, Answer, AnswerSet};
use crate::types::dlq::{DeadLetterEntry, DlqFilter, ErrorType};
use crate::types::firm::Firm;
use crate::types::page::{CrawledPage, FirmDocs};
use crate::types::question::{Question, Tier};
use crate::types::run::{
    Company, FirmRunStats, ResultAnswer, RunError, RunResult, RunStatus,
};
use crate::types::ExtractorConfig;

/// Skip reason recorded when a firm yields no usable page text.
pub const SKIP_REASON_NO_PAGES: &str = "no_pages";

/// Fixed sub-paths probed when the direct crawler is unavailable.
pub const PROBE_PATHS: [&str; 12] = [
    "/about",
    "/team",
    "/portfolio",
    "/strategy",
    "/contact",
    "/news",
    "/blog",
    "/insights",
    "/perspectives",
    "/research",
    "/press-releases",
    "/media",
];

const SERVICE_LLM: &str = "llm";
const SERVICE_CRAWLER: &str = "crawler";
const TIER1_MAX_TOKENS: u32 = 1024;
const TIER2_MAX_TOKENS: u32 = 2048;
const CHECKPOINT_PHASE_TIER1: &str = "tier1";
const SCRAPE_CACHE_TTL_HOURS: i64 = 24;

/// Outcome of one firm extraction.
#[derive(Debug, Clone)]
pub struct FirmRunReport {
    pub firm_id: i64,
    pub run_id: i64,
    pub status: RunStatus,
    pub stats: FirmRunStats,
}

/// An error annotated with the pipeline phase it happened in.
#[derive(Debug)]
struct PhasedError {
    phase: &'static str,
    error: IntelError,
}

fn at_phase(phase: &'static str) -> impl Fn(IntelError) -> PhasedError {
    move |error| PhasedError { phase, error }
}

fn checkpoint_key(firm_id: i64) -> String {
    format!("pe-firm-{firm_id}")
}

/// The extraction engine, generic over its store and crawler.
pub struct Extractor<S: Store, C: SiteCrawler> {
    store: Arc<S>,
    crawler: Arc<C>,
    executor: BatchExecutor,
    breakers: Arc<BreakerRegistry>,
    cost: CostTracker,
    prices: PriceTable,
    catalog: crate::types::question::QuestionCatalog,
    config: ExtractorConfig,
}

impl<S: Store, C: SiteCrawler> Extractor<S, C> {
    /// Create an extractor with the default catalog and tuning.
    pub fn new(
        store: Arc<S>,
        crawler: Arc<C>,
        client: Arc<dyn Client>,
        config: ExtractorConfig,
    ) -> Self {
        Self::with_catalog(
            store,
            crawler,
            client,
            config,
            crate::types::question::default_catalog(),
        )
    }

    /// Create with an explicit question catalog.
    pub fn with_catalog(
        store: Arc<S>,
        crawler: Arc<C>,
        client: Arc<dyn Client>,
        config: ExtractorConfig,
        catalog: crate::types::question::QuestionCatalog,
    ) -> Self {
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let prices = PriceTable::default();
        Self {
            executor: BatchExecutor::with_config(
                client,
                breakers.get(SERVICE_LLM),
                BatchConfig::default(),
            ),
            cost: CostTracker::new(config.max_cost_per_firm, prices),
            store,
            crawler,
            breakers,
            prices,
            catalog,
            config,
        }
    }

    /// Circuit-breaker states, for diagnostics.
    pub fn breaker_states(&self) -> std::collections::HashMap<String, crate::resilience::CircuitState> {
        self.breakers.states()
    }

    /// Dry-run cost estimate for a number of firms.
    pub fn estimate(&self, firms: usize) -> CostEstimate {
        estimate_batch_cost(firms, &self.catalog, &self.prices, self.config.max_tier)
    }

    /// Extract one firm.
    pub async fn run_firm(&self, firm_id: i64) -> Result<FirmRunReport> {
        self.run_firm_with_cancel(firm_id, &CancellationToken::new())
            .await
    }

    /// Extract one firm under a cancellation token.
    pub async fn run_firm_with_cancel(
        &self,
        firm_id: i64,
        cancel: &CancellationToken,
    ) -> Result<FirmRunReport> {
        self.run_firm_inner(firm_id, cancel)
            .await
            .map_err(|phased| phased.error)
    }

    /// Extract a batch of firms with bounded concurrency.
    ///
    /// Per-firm failures are logged (and, when transient, dead-lettered) but
    /// never cancel peers. In dry-run mode the estimate is logged and nothing
    /// runs. After the batch the denormalized answer view is refreshed.
    pub async fn run_batch(
        &self,
        firm_ids: &[i64],
        cancel: &CancellationToken,
    ) -> Vec<(i64, Result<FirmRunReport>)> {
        if self.config.dry_run {
            let estimate = self.estimate(firm_ids.len());
            info!(%estimate, "dry run, no extraction performed");
            return Vec::new();
        }

        let results: Vec<(i64, Result<FirmRunReport>)> = stream::iter(firm_ids.iter().copied())
            .map(|firm_id| async move {
                let result = self.run_firm_inner(firm_id, cancel).await;
                if let Err(phased) = &result {
                    warn!(
                        firm_id,
                        phase = phased.phase,
                        error = %phased.error,
                        "firm extraction failed"
                    );
                    if is_transient(&phased.error) {
                        self.enqueue_dead_letter(firm_id, phased).await;
                    }
                }
                (firm_id, result.map_err(|p| p.error))
            })
            .buffer_unordered(self.config.batch_concurrency.max(1))
            .collect()
            .await;

        if let Err(err) = self.store.refresh_answer_view(true).await {
            debug!(error = %err, "concurrent view refresh failed, retrying plain");
            if let Err(err) = self.store.refresh_answer_view(false).await {
                warn!(error = %err, "answer view refresh failed");
            }
        }

        results
    }

    /// Replay due transient dead letters. Returns how many succeeded.
    pub async fn redrive(&self, limit: usize, cancel: &CancellationToken) -> Result<usize> {
        let filter = DlqFilter {
            error_type: Some(ErrorType::Transient),
            limit: Some(limit),
        };
        let entries = self.store.dequeue_dead_letters(&filter).await?;
        let mut replayed = 0usize;

        for entry in entries {
            let Some(firm_id) = entry.company.get("firm_id").and_then(|v| v.as_i64()) else {
                warn!(id = %entry.id, "dead letter without firm_id, dropping");
                self.store.remove_dead_letter(&entry.id).await.ok();
                continue;
            };

            match self.run_firm_with_cancel(firm_id, cancel).await {
                Ok(_) => {
                    self.store.remove_dead_letter(&entry.id).await?;
                    replayed += 1;
                }
                Err(err) => {
                    // Push the next attempt out on a doubling horizon.
                    let minutes = 5i64 << entry.retry_count.min(6);
                    let next_retry_at = Utc::now() + chrono::Duration::minutes(minutes);
                    self.store
                        .increment_dead_letter_retry(&entry.id, next_retry_at, &err.to_string())
                        .await?;
                }
            }
        }
        Ok(replayed)
    }

    async fn run_firm_inner(
        &self,
        firm_id: i64,
        cancel: &CancellationToken,
    ) -> std::result::Result<FirmRunReport, PhasedError> {
        let firm = self
            .store
            .get_firm(firm_id)
            .await
            .map_err(at_phase("load"))?
            .ok_or_else(|| PhasedError {
                phase: "load",
                error: IntelError::FirmNotFound { firm_id },
            })?;

        if self.config.dry_run {
            let estimate = self.estimate(1);
            info!(firm = %firm.name, %estimate, "dry run, no extraction performed");
            return Ok(FirmRunReport {
                firm_id,
                run_id: 0,
                status: RunStatus::Skipped,
                stats: FirmRunStats {
                    skip_reason: Some("dry_run".to_string()),
                    ..Default::default()
                },
            });
        }

        // Mirror the firm run onto the generic pipeline surface so the
        // monitor and high-confidence lookup see a uniform record.
        let mut company = Company::new(&firm.name).with_firm_id(firm_id);
        if let Some(url) = &firm.website_url {
            company = company.with_url(url);
        }
        let run = self
            .store
            .create_run(&company)
            .await
            .map_err(at_phase("init"))?;

        let crawl_phase = self
            .store
            .create_phase(run.id, "crawl")
            .await
            .map_err(at_phase("crawl"))?;
        let (pages, from_cache) = self.resolve_pages(&firm).await;
        let docs = FirmDocs::build(pages);
        self.store
            .complete_phase(
                crawl_phase.id,
                &serde_json::json!({
                    "pages": docs.page_count(),
                    "from_cache": from_cache,
                }),
            )
            .await
            .map_err(at_phase("crawl"))?;

        if !docs.has_content() {
            info!(firm = %firm.name, "no usable page text, skipping run");
            let firm_run = self
                .store
                .create_firm_run(firm_id)
                .await
                .map_err(at_phase("skip"))?;
            self.store
                .skip_firm_run(firm_run.id, SKIP_REASON_NO_PAGES)
                .await
                .map_err(at_phase("skip"))?;
            self.store
                .update_run_status(run.id, RunStatus::Skipped)
                .await
                .map_err(at_phase("skip"))?;

            return Ok(FirmRunReport {
                firm_id,
                run_id: firm_run.id,
                status: RunStatus::Skipped,
                stats: FirmRunStats {
                    pages_crawled: docs.page_count(),
                    pages_from_cache: from_cache,
                    skip_reason: Some(SKIP_REASON_NO_PAGES.to_string()),
                    ..Default::default()
                },
            });
        }

        let firm_run = self
            .store
            .create_firm_run(firm_id)
            .await
            .map_err(at_phase("init"))?;
        self.store
            .update_run_status(run.id, RunStatus::Running)
            .await
            .map_err(at_phase("init"))?;

        let mut stats = FirmRunStats {
            pages_crawled: docs.page_count(),
            pages_from_cache: from_cache,
            ..Default::default()
        };

        let answers = match self
            .extract_answers(&firm, &docs, run.id, firm_run.id, &mut stats, cancel)
            .await
        {
            Ok(answers) => answers,
            Err(phased) => {
                self.mark_failed(run.id, firm_run.id, &phased).await;
                return Err(phased);
            }
        };

        let rows: Vec<Answer> = answers.values().cloned().collect();
        stats.answers_extracted = rows.len();

        if let Err(error) = self.store.upsert_answers(&rows).await {
            let phased = PhasedError {
                phase: "persist",
                error,
            };
            self.mark_failed(run.id, firm_run.id, &phased).await;
            return Err(phased);
        }

        self.store
            .complete_firm_run(firm_run.id, &stats)
            .await
            .map_err(at_phase("persist"))?;

        let score = if rows.is_empty() {
            0.0
        } else {
            rows.iter().map(|a| a.confidence).sum::<f64>() / rows.len() as f64
        };
        let result = RunResult {
            cost_usd: stats.cost_usd,
            score,
            answers: rows
                .iter()
                .map(|a| ResultAnswer {
                    question_key: a.question_key.clone(),
                    value: a.value.clone(),
                    confidence: a.confidence,
                })
                .collect(),
        };
        self.store
            .update_run_result(run.id, &result)
            .await
            .map_err(at_phase("persist"))?;

        if let Err(err) = self.store.delete_checkpoint(&checkpoint_key(firm_id)).await {
            warn!(firm_id, error = %err, "failed to clear tier-1 checkpoint");
        }

        info!(
            firm = %firm.name,
            run_id = firm_run.id,
            answers = rows.len(),
            cost_usd = stats.cost_usd,
            "extraction complete"
        );
        Ok(FirmRunReport {
            firm_id,
            run_id: firm_run.id,
            status: RunStatus::Complete,
            stats,
        })
    }

    async fn extract_answers(
        &self,
        firm: &Firm,
        docs: &FirmDocs,
        run_id: Uuid,
        firm_run_id: i64,
        stats: &mut FirmRunStats,
        cancel: &CancellationToken,
    ) -> std::result::Result<AnswerSet, PhasedError> {
        let firm_id = firm.firm_id;
        let cost_before = self.cost.cost(firm_id);
        let mut answers = AnswerSet::new();
        let mut usage_total = TokenUsage::default();

        // ---- tier 1 ----
        let phase = self
            .store
            .create_phase(run_id, "tier1")
            .await
            .map_err(at_phase("tier1"))?;

        if let Some(saved) = self.load_tier1_checkpoint(firm_id).await {
            info!(firm_id, answers = saved.len(), "resuming from tier-1 checkpoint");
            for mut answer in saved {
                answer.run_id = firm_run_id;
                merge_answer(&mut answers, answer);
            }
        } else {
            let system = cached_system(prompts::format_tier1_system(&firm.name));
            let questions = self.catalog.tier(Tier::One);
            let items = build_items(
                &questions,
                docs,
                &system,
                &self.config.tier1_model,
                TIER1_MAX_TOKENS,
            );
            stats.questions_asked += items.len();

            if !items.is_empty() {
                match self
                    .executor
                    .prime_cache(&system, &self.config.tier1_model)
                    .await
                {
                    Ok(usage) => {
                        usage_total.add(&usage);
                        self.cost.record(firm_id, Tier::One, &usage);
                    }
                    Err(err) => warn!(error = %err, "tier-1 cache primer failed"),
                }

                let outcome = self
                    .executor
                    .execute(items, Tier::One, cancel)
                    .await
                    .map_err(at_phase("tier1"))?;
                usage_total.add(&outcome.usage);
                self.cost.record(firm_id, Tier::One, &outcome.usage);
                merge_answers(
                    &mut answers,
                    self.stamp(outcome.answers, firm_id, firm_run_id, Tier::One),
                );
            }

            self.save_tier1_checkpoint(firm_id, &answers).await;
        }

        self.store
            .complete_phase(phase.id, &serde_json::json!({ "answers": answers.len() }))
            .await
            .map_err(at_phase("tier1"))?;

        // ---- tier 2 ----
        if self.config.max_tier >= 2 {
            if self.cost.budget_exhausted(firm_id) {
                info!(
                    firm_id,
                    cost_usd = self.cost.cost(firm_id),
                    "budget exhausted, skipping tier 2"
                );
            } else {
                let phase = self
                    .store
                    .create_phase(run_id, "tier2")
                    .await
                    .map_err(at_phase("tier2"))?;

                let escalations: Vec<&Question> = answers
                    .values()
                    .filter(|a| {
                        a.tier == Tier::One && a.confidence < self.config.escalation_threshold
                    })
                    .filter_map(|a| self.catalog.get(&a.question_key))
                    .collect();
                stats.tier2_escalations = escalations.len();

                let mut tier2: IndexMap<&str, &Question> = IndexMap::new();
                for question in self.catalog.tier(Tier::Two) {
                    tier2.insert(question.key.as_str(), question);
                }
                for question in escalations {
                    tier2.insert(question.key.as_str(), question);
                }

                let recap = prompts::format_tier1_recap(&answers);
                let (blog, synthesis): (Vec<&Question>, Vec<&Question>) = tier2
                    .values()
                    .copied()
                    .partition(|q| q.is_blog_intelligence());

                for (group, system_prompt) in [
                    (synthesis, prompts::format_tier2_system(&firm.name, &recap)),
                    (blog, prompts::format_blog_system(&firm.name, &recap)),
                ] {
                    if group.is_empty() {
                        continue;
                    }
                    let system = cached_system(system_prompt);
                    let items = build_items(
                        &group,
                        docs,
                        &system,
                        &self.config.tier2_model,
                        TIER2_MAX_TOKENS,
                    );
                    stats.questions_asked += items.len();
                    if items.is_empty() {
                        continue;
                    }

                    match self
                        .executor
                        .prime_cache(&system, &self.config.tier2_model)
                        .await
                    {
                        Ok(usage) => {
                            usage_total.add(&usage);
                            self.cost.record(firm_id, Tier::Two, &usage);
                        }
                        Err(err) => warn!(error = %err, "tier-2 cache primer failed"),
                    }

                    let outcome = self
                        .executor
                        .execute(items, Tier::Two, cancel)
                        .await
                        .map_err(at_phase("tier2"))?;
                    usage_total.add(&outcome.usage);
                    self.cost.record(firm_id, Tier::Two, &outcome.usage);
                    merge_answers(
                        &mut answers,
                        self.stamp(outcome.answers, firm_id, firm_run_id, Tier::Two),
                    );
                }

                self.store
                    .complete_phase(
                        phase.id,
                        &serde_json::json!({
                            "answers": answers.len(),
                            "escalations": stats.tier2_escalations,
                        }),
                    )
                    .await
                    .map_err(at_phase("tier2"))?;
            }
        }

        stats.input_tokens = usage_total.input_tokens;
        stats.output_tokens = usage_total.output_tokens;
        stats.cache_write_tokens = usage_total.cache_creation_input_tokens;
        stats.cache_read_tokens = usage_total.cache_read_input_tokens;
        stats.cost_usd = self.cost.cost(firm_id) - cost_before;

        Ok(answers)
    }

    /// Resolve a firm's pages: fresh cache, else crawl, else nothing.
    /// Crawl failure is non-fatal; the firm proceeds with zero pages.
    async fn resolve_pages(
        &self,
        firm: &Firm,
    ) -> (Vec<crate::types::page::ClassifiedPage>, bool) {
        if !self.config.force {
            match self.store.get_firm_crawl_cache(firm.firm_id).await {
                Ok(rows) if !rows.is_empty() => {
                    let cutoff = Utc::now() - self.config.crawl_cache_ttl();
                    if rows.iter().any(|row| row.crawled_at > cutoff) {
                        debug!(firm_id = firm.firm_id, pages = rows.len(), "crawl cache hit");
                        return (rows.into_iter().map(|row| row.page).collect(), true);
                    }
                }
                Ok(_) => {}
                Err(err) => warn!(firm_id = firm.firm_id, error = %err, "crawl cache read failed"),
            }
        }

        let Some(website_url) = &firm.website_url else {
            return (Vec::new(), false);
        };

        match self.crawl_site(website_url).await {
            Ok(crawled) => {
                let classified: Vec<_> = crawled.into_iter().map(classify_page).collect();
                if let Err(err) = self
                    .store
                    .upsert_firm_crawl_cache(firm.firm_id, &classified)
                    .await
                {
                    warn!(firm_id = firm.firm_id, error = %err, "crawl cache writeback failed");
                }
                (classified, false)
            }
            Err(err) => {
                warn!(
                    firm_id = firm.firm_id,
                    url = %website_url,
                    error = %err,
                    "crawl failed, proceeding without pages"
                );
                (Vec::new(), false)
            }
        }
    }

    async fn crawl_site(&self, base_url: &str) -> Result<Vec<CrawledPage>> {
        let breaker = self.breakers.get(SERVICE_CRAWLER);

        let probe = match self.crawler.probe(base_url).await {
            Ok(probe) => probe,
            Err(err) => {
                warn!(url = %base_url, error = %err, "probe failed, treating as unreachable");
                crate::traits::crawler::ProbeResult::default()
            }
        };

        if probe.needs_fallback() {
            info!(
                url = %base_url,
                blocked = probe.blocked,
                block_type = probe.block_type.as_deref().unwrap_or(""),
                "direct crawl unavailable, using scrape chain"
            );
            return self.scrape_chain(base_url, &breaker).await;
        }

        let mut urls = breaker
            .execute(|| async {
                self.crawler
                    .discover_links(
                        base_url,
                        self.config.discover_max_pages,
                        self.config.discover_max_depth,
                    )
                    .await
            })
            .await?;
        urls.truncate(self.config.discover_max_pages);

        self.crawler
            .scrape_all(&urls, self.config.scrape_concurrency)
            .await
    }

    /// Scrape the base URL plus the fixed probe paths, consulting the
    /// per-URL scrape cache around each fetch.
    async fn scrape_chain(
        &self,
        base_url: &str,
        breaker: &Arc<CircuitBreaker>,
    ) -> Result<Vec<CrawledPage>> {
        let base = base_url.trim_end_matches('/');
        let mut urls = vec![base_url.to_string()];
        urls.extend(PROBE_PATHS.iter().map(|path| format!("{base}{path}")));

        let breaker = Arc::clone(breaker);
        let breaker_ref = &breaker;
        let pages: Vec<Option<CrawledPage>> = stream::iter(urls)
            .map(|url| async move {
                match self.store.get_cached_scrape(&url).await {
                    Ok(Some(content)) => return Some(CrawledPage::new(url, content)),
                    Ok(None) => {}
                    Err(err) => warn!(url = %url, error = %err, "scrape cache read failed"),
                }

                match breaker_ref
                    .execute(|| async { self.crawler.scrape(&url).await })
                    .await
                {
                    Ok(page) => {
                        if let Err(err) = self
                            .store
                            .set_cached_scrape(
                                &url,
                                &page.markdown,
                                chrono::Duration::hours(SCRAPE_CACHE_TTL_HOURS),
                            )
                            .await
                        {
                            warn!(url = %url, error = %err, "scrape cache write failed");
                        }
                        Some(page)
                    }
                    Err(err) => {
                        warn!(url = %url, error = %err, "scrape failed");
                        None
                    }
                }
            })
            .buffer_unordered(self.config.scrape_concurrency.max(1))
            .collect()
            .await;

        Ok(pages.into_iter().flatten().collect())
    }

    fn stamp(
        &self,
        parsed: Vec<ParsedAnswer>,
        firm_id: i64,
        run_id: i64,
        tier: Tier,
    ) -> Vec<Answer> {
        parsed
            .into_iter()
            .map(|p| {
                let source_page_type = self
                    .catalog
                    .get(&p.question_key)
                    .and_then(|q| q.page_types.first().copied());
                Answer {
                    firm_id,
                    question_key: p.question_key,
                    value: p.value,
                    confidence: p.confidence.clamp(0.0, 1.0),
                    tier,
                    reasoning: p.reasoning,
                    source_page_type,
                    model: p.model,
                    input_tokens: p.usage.input_tokens as i64,
                    output_tokens: p.usage.output_tokens as i64,
                    run_id,
                }
            })
            .collect()
    }

    async fn load_tier1_checkpoint(&self, firm_id: i64) -> Option<Vec<Answer>> {
        match self.store.load_checkpoint(&checkpoint_key(firm_id)).await {
            Ok(Some(checkpoint)) if checkpoint.phase == CHECKPOINT_PHASE_TIER1 => {
                serde_json::from_slice(&checkpoint.data).ok()
            }
            Ok(_) => None,
            Err(err) => {
                warn!(firm_id, error = %err, "checkpoint load failed");
                None
            }
        }
    }

    async fn save_tier1_checkpoint(&self, firm_id: i64, answers: &AnswerSet) {
        let rows: Vec<&Answer> = answers.values().collect();
        match serde_json::to_vec(&rows) {
            Ok(blob) => {
                if let Err(err) = self
                    .store
                    .save_checkpoint(&checkpoint_key(firm_id), CHECKPOINT_PHASE_TIER1, &blob)
                    .await
                {
                    warn!(firm_id, error = %err, "checkpoint save failed");
                }
            }
            Err(err) => warn!(firm_id, error = %err, "checkpoint serialize failed"),
        }
    }

    async fn mark_failed(&self, run_id: Uuid, firm_run_id: i64, phased: &PhasedError) {
        if let Err(err) = self
            .store
            .fail_firm_run(firm_run_id, &phased.error.to_string())
            .await
        {
            warn!(firm_run_id, error = %err, "failed to mark firm run failed");
        }
        let record = RunError {
            message: phased.error.to_string(),
            category: phased.error.category().to_string(),
        };
        if let Err(err) = self.store.fail_run(run_id, &record).await {
            warn!(%run_id, error = %err, "failed to mark run failed");
        }
    }

    async fn enqueue_dead_letter(&self, firm_id: i64, phased: &PhasedError) {
        let company = match self.store.get_firm(firm_id).await {
            Ok(Some(firm)) => serde_json::json!({
                "firm_id": firm.firm_id,
                "name": firm.name,
                "url": firm.website_url,
            }),
            _ => serde_json::json!({ "firm_id": firm_id }),
        };

        let entry = DeadLetterEntry::new(
            checkpoint_key(firm_id),
            company,
            phased.error.to_string(),
            ErrorType::Transient,
        )
        .with_failed_phase(phased.phase)
        .with_next_retry_at(Utc::now() + chrono::Duration::minutes(5));

        if let Err(err) = self.store.enqueue_dead_letter(&entry).await {
            warn!(firm_id, error = %err, "dead-letter enqueue failed");
        }
    }
}

/// Build executable items for a question set: route the context, omit
/// questions whose context is empty, and wrap the rest as requests.
fn build_items(
    questions: &[&Question],
    docs: &FirmDocs,
    system: &[SystemBlock],
    model: &str,
    max_tokens: u32,
) -> Vec<BatchItem> {
    questions
        .iter()
        .filter_map(|question| {
            let context = route_context(question, docs);
            if context.is_empty() {
                debug!(question = %question.key, "no routed context, omitting question");
                return None;
            }
            let message = prompts::format_question_message(question, &context);
            Some(BatchItem {
                question: (*question).clone(),
                request: MessageRequest {
                    model: model.to_string(),
                    max_tokens,
                    system: system.to_vec(),
                    messages: vec![Message::user(message)],
                    temperature: Some(0.0),
                },
            })
        })
        .collect()
}
