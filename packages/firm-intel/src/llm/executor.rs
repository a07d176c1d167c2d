//! The LLM batch executor.
//!
//! Executes a set of per-question requests either as direct concurrent calls
//! or as one submitted batch, depending on a tier-dependent size threshold.
//! Also owns the prompt-cache primer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use llm_client::{
    BatchRequestItem, BatchResultType, BatchStatus, CacheControl, Client, Message, MessageRequest,
    MessageResponse, SystemBlock, TokenUsage,
};

use crate::error::{IntelError, Result};
use crate::llm::parse::parse_envelope;
use crate::resilience::{retry, CircuitBreaker, RetryConfig};
use crate::types::question::{Question, Tier};

/// One request to execute; the question key doubles as the batch custom_id.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub question: Question,
    pub request: MessageRequest,
}

/// A successfully parsed per-question answer.
#[derive(Debug, Clone)]
pub struct ParsedAnswer {
    pub question_key: String,
    pub value: serde_json::Value,
    pub confidence: f64,
    pub reasoning: Option<String>,
    pub model: String,
    pub usage: TokenUsage,
}

/// Everything a phase execution produced.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub answers: Vec<ParsedAnswer>,
    pub usage: TokenUsage,
}

/// Executor tuning.
#[derive(Clone)]
pub struct BatchConfig {
    /// In-flight limit for the direct path
    pub direct_concurrency: usize,

    /// Item counts above which each tier uses a submitted batch
    pub tier1_batch_threshold: usize,
    pub tier2_batch_threshold: usize,

    /// Poll schedule for submitted batches
    pub poll_initial: Duration,
    pub poll_cap: Duration,
    pub poll_jitter_fraction: f64,
    pub poll_timeout: Duration,

    /// Per-call retry policy on the direct path
    pub call_retry: RetryConfig,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            direct_concurrency: 10,
            tier1_batch_threshold: 15,
            tier2_batch_threshold: 4,
            poll_initial: Duration::from_secs(2),
            poll_cap: Duration::from_secs(15),
            poll_jitter_fraction: 0.2,
            poll_timeout: Duration::from_secs(30 * 60),
            // Direct-path retries back off on the exact 0.5s/1s/2s ladder;
            // only the batch poll schedule is jittered.
            call_retry: RetryConfig::default().without_jitter(),
        }
    }
}

impl BatchConfig {
    fn batch_threshold(&self, tier: Tier) -> usize {
        match tier {
            Tier::One => self.tier1_batch_threshold,
            Tier::Two => self.tier2_batch_threshold,
        }
    }

    /// Next poll interval: double, capped, with ±jitter.
    pub fn next_poll_interval(&self, current: Duration) -> Duration {
        let doubled = current.saturating_mul(2);
        doubled.min(self.poll_cap)
    }

    fn jittered(&self, interval: Duration) -> Duration {
        if self.poll_jitter_fraction <= 0.0 {
            return interval;
        }
        let factor = 1.0
            + rand::rng()
                .random_range(-self.poll_jitter_fraction..=self.poll_jitter_fraction);
        Duration::from_secs_f64((interval.as_secs_f64() * factor).max(0.0))
    }
}

/// Fan-out executor over an abstract LLM client.
pub struct BatchExecutor {
    client: Arc<dyn Client>,
    breaker: Arc<CircuitBreaker>,
    config: BatchConfig,
}

impl BatchExecutor {
    /// Create an executor over a client, guarded by the given breaker.
    pub fn new(client: Arc<dyn Client>, breaker: Arc<CircuitBreaker>) -> Self {
        Self {
            client,
            breaker,
            config: BatchConfig::default(),
        }
    }

    /// Create with custom tuning.
    pub fn with_config(
        client: Arc<dyn Client>,
        breaker: Arc<CircuitBreaker>,
        config: BatchConfig,
    ) -> Self {
        Self {
            client,
            breaker,
            config,
        }
    }

    /// Execute a set of items for a tier.
    pub async fn execute(
        &self,
        items: Vec<BatchItem>,
        tier: Tier,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        if items.is_empty() {
            return Ok(BatchOutcome::default());
        }

        if items.len() > self.config.batch_threshold(tier) {
            debug!(items = items.len(), tier = tier.as_u8(), "using submitted batch");
            self.execute_submitted(items, cancel).await
        } else {
            debug!(items = items.len(), tier = tier.as_u8(), "using direct calls");
            self.execute_direct(items, cancel).await
        }
    }

    /// Warm the vendor prompt cache for a system prefix.
    ///
    /// Fires one small request carrying the same cacheable system blocks; the
    /// response is discarded but its tokens count toward the phase total.
    pub async fn prime_cache(&self, system: &[SystemBlock], model: &str) -> Result<TokenUsage> {
        let request = MessageRequest {
            model: model.to_string(),
            max_tokens: 8,
            system: system.to_vec(),
            messages: vec![Message::user("Reply with OK.")],
            temperature: Some(0.0),
        };

        let response = self
            .breaker
            .execute(|| async {
                self.client
                    .create_message(&request)
                    .await
                    .map_err(IntelError::from)
            })
            .await?;

        debug!(
            cache_write = response.usage.cache_creation_input_tokens,
            cache_read = response.usage.cache_read_input_tokens,
            "primed prompt cache"
        );
        Ok(response.usage)
    }

    async fn execute_direct(
        &self,
        items: Vec<BatchItem>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let results: Vec<(Option<ParsedAnswer>, TokenUsage)> = stream::iter(items)
            .map(|item| async move {
                let response = retry(&self.config.call_retry, cancel, |_| {
                    let request = &item.request;
                    async move {
                        self.breaker
                            .execute(|| async {
                                self.client
                                    .create_message(request)
                                    .await
                                    .map_err(IntelError::from)
                            })
                            .await
                    }
                })
                .await;

                match response {
                    Ok(response) => {
                        let usage = response.usage;
                        (parse_item(&item.question, &response), usage)
                    }
                    Err(err) => {
                        warn!(question = %item.question.key, error = %err, "LLM call failed, skipping question");
                        (None, TokenUsage::default())
                    }
                }
            })
            .buffer_unordered(self.config.direct_concurrency)
            .collect()
            .await;

        let mut outcome = BatchOutcome::default();
        for (answer, usage) in results {
            outcome.usage.add(&usage);
            if let Some(answer) = answer {
                outcome.answers.push(answer);
            }
        }
        Ok(outcome)
    }

    async fn execute_submitted(
        &self,
        items: Vec<BatchItem>,
        cancel: &CancellationToken,
    ) -> Result<BatchOutcome> {
        let requests: Vec<BatchRequestItem> = items
            .iter()
            .map(|item| BatchRequestItem::new(&item.question.key, item.request.clone()))
            .collect();
        let questions: HashMap<&str, &Question> = items
            .iter()
            .map(|item| (item.question.key.as_str(), &item.question))
            .collect();

        let batch = self.client.create_batch(&requests).await?;
        info!(batch_id = %batch.id, items = requests.len(), "submitted batch");

        self.poll_until_ended(&batch.id, cancel).await?;

        let mut results = self.client.get_batch_results(&batch.id).await?;
        let mut outcome = BatchOutcome::default();
        let mut failed = 0usize;

        while let Some(item) = results.next().await {
            let item = match item {
                Ok(item) => item,
                Err(err) => {
                    warn!(error = %err, "undecodable batch result line");
                    failed += 1;
                    continue;
                }
            };

            match (item.result.result_type, item.result.message) {
                (BatchResultType::Succeeded, Some(message)) => {
                    outcome.usage.add(&message.usage);
                    if let Some(question) = questions.get(item.custom_id.as_str()) {
                        if let Some(answer) = parse_item(question, &message) {
                            outcome.answers.push(answer);
                        }
                    } else {
                        warn!(custom_id = %item.custom_id, "result for unknown custom_id");
                    }
                }
                (result_type, _) => {
                    warn!(custom_id = %item.custom_id, result_type = ?result_type, "batch item did not succeed");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            info!(failed, total = requests.len(), "batch completed with failed items");
        }
        Ok(outcome)
    }

    async fn poll_until_ended(&self, batch_id: &str, cancel: &CancellationToken) -> Result<()> {
        let deadline = tokio::time::Instant::now() + self.config.poll_timeout;
        let mut interval = self.config.poll_initial;

        loop {
            if cancel.is_cancelled() {
                return Err(IntelError::Cancelled);
            }

            let batch = self.client.get_batch(batch_id).await?;
            match batch.processing_status {
                BatchStatus::Ended => return Ok(()),
                BatchStatus::Expired | BatchStatus::Canceled | BatchStatus::Canceling => {
                    return Err(IntelError::permanent(format!(
                        "batch {batch_id} terminated: {:?}",
                        batch.processing_status
                    )));
                }
                BatchStatus::InProgress => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(IntelError::transient(format!(
                    "batch {batch_id} still in progress after {:?}",
                    self.config.poll_timeout
                )));
            }

            let sleep_for = self.config.jittered(interval);
            debug!(batch_id, sleep_ms = sleep_for.as_millis() as u64, "batch not ready");
            tokio::select! {
                _ = tokio::time::sleep(sleep_for) => {}
                _ = cancel.cancelled() => return Err(IntelError::Cancelled),
            }

            interval = self.config.next_poll_interval(interval);
        }
    }
}

fn parse_item(question: &Question, response: &MessageResponse) -> Option<ParsedAnswer> {
    match parse_envelope(&response.text()) {
        Ok(envelope) => Some(ParsedAnswer {
            question_key: question.key.clone(),
            value: envelope.value,
            confidence: envelope.confidence,
            reasoning: envelope.reasoning,
            model: response.model.clone(),
            usage: response.usage,
        }),
        Err(err) => {
            warn!(question = %question.key, error = %err, "unparseable response dropped");
            None
        }
    }
}

/// A cacheable system prefix: one block with a one-hour cache marker.
pub fn cached_system(prompt: impl Into<String>) -> Vec<SystemBlock> {
    vec![SystemBlock::text(prompt).cached(CacheControl::one_hour())]
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_client::MockClient;
    use crate::types::page::PageType;
    use crate::types::question::OutputFormat;
    use crate::resilience::BreakerConfig;

    fn question(key: &str) -> Question {
        Question {
            key: key.into(),
            text: format!("question about {key}"),
            tier: Tier::One,
            category: "test".into(),
            page_types: vec![PageType::Homepage],
            output_format: OutputFormat::String,
        }
    }

    fn item(key: &str) -> BatchItem {
        BatchItem {
            question: question(key),
            request: MessageRequest::new("test-model", 256)
                .message(Message::user(format!("question about {key}"))),
        }
    }

    fn executor(mock: MockClient) -> BatchExecutor {
        BatchExecutor::new(
            Arc::new(mock),
            Arc::new(CircuitBreaker::new("llm", BreakerConfig::default())),
        )
    }

    #[tokio::test]
    async fn test_direct_path_below_threshold() {
        let mock = MockClient::new()
            .with_answer("pe_a", serde_json::json!("alpha"), 0.9)
            .with_answer("pe_b", serde_json::json!("beta"), 0.6);
        let executor = executor(mock);

        let outcome = executor
            .execute(
                vec![item("pe_a"), item("pe_b")],
                Tier::One,
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(outcome.answers.len(), 2);
        assert!(outcome.usage.input_tokens > 0);
        let alpha = outcome
            .answers
            .iter()
            .find(|a| a.question_key == "pe_a")
            .unwrap();
        assert_eq!(alpha.value, serde_json::json!("alpha"));
    }

    #[tokio::test]
    async fn test_submitted_path_above_threshold() {
        let mock = MockClient::new();
        let items: Vec<BatchItem> = (0..6).map(|i| item(&format!("pe_q{i}"))).collect();

        // Tier 2 threshold is 4, so 6 items go through the batch API.
        let executor = executor(mock);
        let outcome = executor
            .execute(items, Tier::Two, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.answers.len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_path_retries_transient_failures() {
        let mock = MockClient::new().with_transient_failures(2);
        let executor = executor(mock);

        let outcome = executor
            .execute(vec![item("pe_a"), item("pe_b")], Tier::One, &CancellationToken::new())
            .await
            .unwrap();

        // Both items eventually succeed within their retry budgets.
        assert_eq!(outcome.answers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_path_swallows_exhausted_items() {
        // Enough failures that at least one item runs out of attempts.
        let mock = MockClient::new().with_transient_failures(6);
        let executor = executor(mock);

        let outcome = executor
            .execute(vec![item("pe_a"), item("pe_b")], Tier::One, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.answers.len() < 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submitted_path_polls_until_ended() {
        let mock = MockClient::new().with_pending_polls(3);
        let items: Vec<BatchItem> = (0..20).map(|i| item(&format!("pe_q{i}"))).collect();

        let executor = executor(mock);
        let outcome = executor
            .execute(items, Tier::One, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.answers.len(), 20);
    }

    #[tokio::test]
    async fn test_submitted_path_terminal_failure() {
        let mock = MockClient::new().with_terminal_status(BatchStatus::Expired);
        let items: Vec<BatchItem> = (0..20).map(|i| item(&format!("pe_q{i}"))).collect();

        let executor = executor(mock);
        let result = executor
            .execute(items, Tier::One, &CancellationToken::new())
            .await;

        assert!(matches!(result, Err(IntelError::Permanent { .. })));
    }

    #[tokio::test]
    async fn test_primer_reports_usage() {
        let mock = MockClient::new().with_usage(TokenUsage {
            input_tokens: 5,
            output_tokens: 1,
            cache_creation_input_tokens: 2000,
            cache_read_input_tokens: 0,
        });
        let executor = executor(mock);

        let usage = executor
            .prime_cache(&cached_system("You are an analyst."), "test-model")
            .await
            .unwrap();
        assert_eq!(usage.cache_creation_input_tokens, 2000);
    }

    #[test]
    fn test_poll_interval_growth_and_cap() {
        let config = BatchConfig::default();
        let mut interval = config.poll_initial;
        let mut seen = Vec::new();
        for _ in 0..5 {
            seen.push(interval);
            interval = config.next_poll_interval(interval);
        }
        assert_eq!(
            seen,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(15),
                Duration::from_secs(15),
            ]
        );
    }

    #[test]
    fn test_poll_jitter_bounds() {
        let config = BatchConfig::default();
        for _ in 0..50 {
            let jittered = config.jittered(Duration::from_secs(10)).as_secs_f64();
            assert!((8.0 - 1e-9..=12.0 + 1e-9).contains(&jittered), "{jittered}");
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_polling() {
        let mock = MockClient::new().with_pending_polls(1000);
        let items: Vec<BatchItem> = (0..20).map(|i| item(&format!("pe_q{i}"))).collect();
        let executor = executor(mock);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = executor.execute(items, Tier::One, &cancel).await;
        assert!(matches!(result, Err(IntelError::Cancelled)));
    }
}
