//! End-to-end pipeline tests over the mock crawler, mock LLM client, and
//! the in-memory store.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use firm_intel::traits::store::{
    CheckpointStore, DeadLetterStore, FirmStore, RunStore,
};
use firm_intel::types::RunFilter;
use firm_intel::{
    CircuitState, CrawledPage, DeadLetterEntry, ErrorType, Extractor, ExtractorConfig, Firm,
    FirmSource, MemoryStore, MockCrawler, RunStatus, Tier, SKIP_REASON_NO_PAGES,
};
use llm_client::MockClient;

const SITE: &str = "https://summitridge.example";

async fn seeded_store() -> (Arc<MemoryStore>, i64) {
    let store = Arc::new(MemoryStore::new());
    let firm = store
        .upsert_firm(
            &Firm::new(0, "Summit Ridge Capital", FirmSource::AdvFirms).with_website(SITE),
        )
        .await
        .unwrap();
    (store, firm.firm_id)
}

fn firm_site_crawler() -> MockCrawler {
    MockCrawler::new()
        .with_page(CrawledPage::new(format!("{SITE}/"), "Summit Ridge Capital is a lower-middle-market buyout firm.").with_title("Summit Ridge Capital"))
        .with_page(CrawledPage::new(format!("{SITE}/team"), "Jane Doe, Managing Partner. John Roe, Partner.").with_title("Team"))
        .with_page(CrawledPage::new(format!("{SITE}/portfolio"), "Acme Industrial. Beacon Health. Cobalt Software.").with_title("Portfolio"))
        .with_page(CrawledPage::new(format!("{SITE}/about"), "Founded in 2011. $2.4 billion under management. Headquartered in Denver.").with_title("About"))
        .with_page(CrawledPage::new(format!("{SITE}/blog/2025/outlook"), "Our 2025 outlook for industrial software.").with_title("2025 Outlook"))
        .with_page(CrawledPage::new(format!("{SITE}/blog/2021/retrospective"), "Looking back at 2021.").with_title("2021 Retrospective"))
}

fn extractor(
    store: Arc<MemoryStore>,
    crawler: MockCrawler,
    client: MockClient,
    config: ExtractorConfig,
) -> Extractor<MemoryStore, MockCrawler> {
    Extractor::new(store, Arc::new(crawler), Arc::new(client), config)
}

#[tokio::test]
async fn happy_path_tier1_only() {
    let (store, firm_id) = seeded_store().await;
    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        MockClient::new(),
        ExtractorConfig::default().tier1_only(),
    );

    let report = engine.run_firm(firm_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert!(report.stats.answers_extracted > 0);
    assert!(!report.stats.pages_from_cache);

    let answers = store.answers_for_firm(firm_id).await.unwrap();
    assert_eq!(answers.len(), report.stats.answers_extracted);

    // One answer per question key, all tier 1, confidence in range, and the
    // run they reference is terminal.
    let mut keys: Vec<&str> = answers.iter().map(|a| a.question_key.as_str()).collect();
    keys.sort_unstable();
    keys.dedup();
    assert_eq!(keys.len(), answers.len());

    for answer in &answers {
        assert_eq!(answer.tier, Tier::One);
        assert!((0.0..=1.0).contains(&answer.confidence));
        let run = store.get_firm_run(answer.run_id).await.unwrap().unwrap();
        assert!(run.status.is_terminal());
    }

    // The generic mirror run is complete and serves high-confidence reuse.
    let reusable = store
        .high_confidence_answers(SITE, 0.5, None)
        .await
        .unwrap();
    assert!(!reusable.is_empty());

    // The tier-1 checkpoint is cleared after a successful persist.
    assert!(store
        .load_checkpoint(&format!("pe-firm-{firm_id}"))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn cache_hit_skips_crawler_entirely() {
    let (store, firm_id) = seeded_store().await;

    // A prior crawl, well within the 7-day TTL.
    let cached: Vec<_> = vec![
        firm_intel::classify_page(CrawledPage::new(
            format!("{SITE}/about"),
            "Founded in 2011. $2.4B AUM.",
        )),
        firm_intel::classify_page(CrawledPage::new(format!("{SITE}/"), "Homepage body.")),
    ];
    store
        .upsert_firm_crawl_cache(firm_id, &cached)
        .await
        .unwrap();

    let crawler = MockCrawler::new();
    let crawler_calls = Arc::new(crawler);
    let engine = Extractor::new(
        Arc::clone(&store),
        Arc::clone(&crawler_calls),
        Arc::new(MockClient::new()),
        ExtractorConfig::default().tier1_only(),
    );

    let report = engine.run_firm(firm_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert!(report.stats.pages_from_cache);
    assert!(crawler_calls.calls().is_empty(), "crawler must not be invoked");
}

#[tokio::test]
async fn blocked_site_falls_back_to_scrape_chain() {
    let (store, firm_id) = seeded_store().await;

    // Only the /about probe path yields content.
    let crawler = MockCrawler::new()
        .blocked("captcha")
        .with_page(CrawledPage::new(
            format!("{SITE}/about"),
            "Founded in 2011. Denver based.",
        ));
    let crawler = Arc::new(crawler);

    let engine = Extractor::new(
        Arc::clone(&store),
        Arc::clone(&crawler),
        Arc::new(MockClient::new()),
        ExtractorConfig::default().tier1_only(),
    );

    let report = engine.run_firm(firm_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);

    // The chain hit the base URL plus the fixed probe paths.
    let scraped = crawler.scraped_urls();
    assert_eq!(scraped.len(), 13);
    assert!(scraped.contains(&format!("{SITE}/about")));
    assert!(scraped.contains(&format!("{SITE}/press-releases")));
}

#[tokio::test]
async fn blocked_site_with_no_content_is_skipped() {
    let (store, firm_id) = seeded_store().await;
    let engine = extractor(
        Arc::clone(&store),
        MockCrawler::new().blocked("waf"),
        MockClient::new(),
        ExtractorConfig::default(),
    );

    let report = engine.run_firm(firm_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Skipped);
    assert_eq!(report.stats.skip_reason.as_deref(), Some(SKIP_REASON_NO_PAGES));

    // A skipped run has no answers attributable to it.
    let run = store.get_firm_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Skipped);
    assert!(store.answers_for_firm(firm_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn low_confidence_tier1_answers_escalate_to_tier2() {
    let (store, firm_id) = seeded_store().await;

    // The AUM question comes back shaky at tier 1.
    let client = MockClient::new().with_answer(
        "assets under management",
        serde_json::json!("maybe $2B?"),
        0.2,
    );

    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        client,
        ExtractorConfig::default(),
    );

    let report = engine.run_firm(firm_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert!(report.stats.tier2_escalations >= 1);

    let answers = store.answers_for_firm(firm_id).await.unwrap();
    let aum = answers
        .iter()
        .find(|a| a.question_key == "pe_aum")
        .expect("escalated answer persisted");
    // The tier-2 rerun wins the merge for the escalated key.
    assert_eq!(aum.tier, Tier::Two);

    // Native tier-2 questions are answered too.
    assert!(answers
        .iter()
        .any(|a| a.question_key == "pe_thesis_summary" && a.tier == Tier::Two));
}

#[tokio::test]
async fn budget_exhaustion_skips_tier2_but_persists() {
    let (store, firm_id) = seeded_store().await;

    // Tier-1 alone blows through this budget.
    let config = ExtractorConfig::default().with_max_cost_per_firm(0.0001);
    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        MockClient::new(),
        config,
    );

    let report = engine.run_firm(firm_id).await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);

    let answers = store.answers_for_firm(firm_id).await.unwrap();
    assert!(!answers.is_empty());
    assert!(answers.iter().all(|a| a.tier == Tier::One));
}

#[tokio::test(start_paused = true)]
async fn persistent_llm_failures_open_the_circuit() {
    let (store, firm_id) = seeded_store().await;
    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        MockClient::new().with_transient_failures(10_000),
        ExtractorConfig::default().tier1_only(),
    );

    let report = engine.run_firm(firm_id).await.unwrap();

    // Per-question failures are swallowed; the run closes with no answers.
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.stats.answers_extracted, 0);

    let states = engine.breaker_states();
    assert_eq!(states.get("llm"), Some(&CircuitState::Open));
}

#[tokio::test]
async fn dry_run_estimates_without_mutating() {
    let (store, firm_id) = seeded_store().await;
    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        MockClient::new(),
        ExtractorConfig::default().with_dry_run(),
    );

    let estimate = engine.estimate(1);
    assert!(estimate.estimated_cost_usd > 0.0);

    let results = engine.run_batch(&[firm_id], &CancellationToken::new()).await;
    assert!(results.is_empty());

    assert!(store
        .list_runs(&RunFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert!(store.answers_for_firm(firm_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn run_batch_processes_all_firms() {
    let store = Arc::new(MemoryStore::new());
    let mut ids = Vec::new();
    for i in 0..3 {
        let firm = store
            .upsert_firm(&Firm::new(0, format!("Firm {i}"), FirmSource::Manual).with_website(SITE))
            .await
            .unwrap();
        ids.push(firm.firm_id);
    }
    // One id that does not exist.
    ids.push(9_999);

    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        MockClient::new(),
        ExtractorConfig::default().tier1_only(),
    );

    let results = engine.run_batch(&ids, &CancellationToken::new()).await;
    assert_eq!(results.len(), 4);

    let ok = results.iter().filter(|(_, r)| r.is_ok()).count();
    assert_eq!(ok, 3, "the missing firm fails without cancelling peers");
}

#[tokio::test]
async fn redrive_replays_transient_dead_letters() {
    let (store, firm_id) = seeded_store().await;

    store
        .enqueue_dead_letter(&DeadLetterEntry::new(
            format!("pe-firm-{firm_id}"),
            serde_json::json!({"firm_id": firm_id, "name": "Summit Ridge Capital"}),
            "i/o timeout",
            ErrorType::Transient,
        ))
        .await
        .unwrap();
    store
        .enqueue_dead_letter(&DeadLetterEntry::new(
            "pe-firm-424242",
            serde_json::json!({"firm_id": 424242}),
            "i/o timeout",
            ErrorType::Transient,
        ))
        .await
        .unwrap();

    let engine = extractor(
        Arc::clone(&store),
        firm_site_crawler(),
        MockClient::new(),
        ExtractorConfig::default().tier1_only(),
    );

    let replayed = engine.redrive(10, &CancellationToken::new()).await.unwrap();
    assert_eq!(replayed, 1);

    // The replayable entry is gone; the unknown firm stays queued with a
    // bumped retry count and a deferred next attempt.
    assert_eq!(store.count_dead_letters().await.unwrap(), 1);
    assert!(store
        .dequeue_dead_letters(&Default::default())
        .await
        .unwrap()
        .is_empty());
}
