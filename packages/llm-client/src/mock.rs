//! Scripted mock client for tests.
//!
//! Returns deterministic, configurable responses for direct and batched
//! requests without touching the network.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use crate::client::{BatchResults, Client, VecBatchResults};
use crate::error::{ClientError, Result};
use crate::types::{
    Batch, BatchRequestCounts, BatchRequestItem, BatchResult, BatchResultItem, BatchResultType,
    BatchStatus, ContentBlock, MessageRequest, MessageResponse, TokenUsage,
};

/// Record of a call made to the mock client.
#[derive(Debug, Clone)]
pub enum MockCall {
    CreateMessage { model: String },
    CreateBatch { items: usize },
    GetBatch { batch_id: String },
    GetBatchResults { batch_id: String },
}

/// A scripted LLM client.
///
/// Responses are resolved by needle: the first scripted needle found in the
/// request's user content wins. Unmatched requests fall back to a default
/// answer envelope so pipeline tests do not have to script every question.
pub struct MockClient {
    responses: Arc<RwLock<Vec<(String, String)>>>,
    default_text: Arc<RwLock<String>>,
    usage: Arc<RwLock<TokenUsage>>,
    transient_failures: Arc<AtomicUsize>,
    pending_polls: Arc<AtomicUsize>,
    batches: Arc<RwLock<HashMap<String, Vec<BatchRequestItem>>>>,
    calls: Arc<RwLock<Vec<MockCall>>>,
    batch_seq: AtomicUsize,
    terminal_status: Arc<RwLock<BatchStatus>>,
}

impl Default for MockClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MockClient {
    /// Create a mock that answers everything with a neutral envelope.
    pub fn new() -> Self {
        Self {
            responses: Arc::new(RwLock::new(Vec::new())),
            default_text: Arc::new(RwLock::new(
                r#"{"value": "unknown", "confidence": 0.8, "reasoning": "mock"}"#.to_string(),
            )),
            usage: Arc::new(RwLock::new(TokenUsage {
                input_tokens: 1000,
                output_tokens: 100,
                cache_creation_input_tokens: 0,
                cache_read_input_tokens: 0,
            })),
            transient_failures: Arc::new(AtomicUsize::new(0)),
            pending_polls: Arc::new(AtomicUsize::new(0)),
            batches: Arc::new(RwLock::new(HashMap::new())),
            calls: Arc::new(RwLock::new(Vec::new())),
            batch_seq: AtomicUsize::new(0),
            terminal_status: Arc::new(RwLock::new(BatchStatus::Ended)),
        }
    }

    /// Script a raw response text for requests whose user content contains `needle`.
    pub fn with_text_response(self, needle: impl Into<String>, text: impl Into<String>) -> Self {
        self.responses
            .write()
            .unwrap()
            .push((needle.into(), text.into()));
        self
    }

    /// Script an answer envelope for requests whose user content contains `needle`.
    pub fn with_answer(
        self,
        needle: impl Into<String>,
        value: serde_json::Value,
        confidence: f64,
    ) -> Self {
        let text = serde_json::json!({
            "value": value,
            "confidence": confidence,
            "reasoning": "mock reasoning",
        })
        .to_string();
        self.with_text_response(needle, text)
    }

    /// Set the fallback response text for unscripted requests.
    pub fn with_default_text(self, text: impl Into<String>) -> Self {
        *self.default_text.write().unwrap() = text.into();
        self
    }

    /// Set the usage reported on every response.
    pub fn with_usage(self, usage: TokenUsage) -> Self {
        *self.usage.write().unwrap() = usage;
        self
    }

    /// Fail the next `n` direct calls with a transient API error.
    pub fn with_transient_failures(self, n: usize) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Report `in_progress` for the first `n` status polls.
    pub fn with_pending_polls(self, n: usize) -> Self {
        self.pending_polls.store(n, Ordering::SeqCst);
        self
    }

    /// Status that polls settle on once pending polls drain (default `Ended`).
    pub fn with_terminal_status(self, status: BatchStatus) -> Self {
        *self.terminal_status.write().unwrap() = status;
        self
    }

    /// Get all calls made against this mock.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.read().unwrap().clone()
    }

    /// Count of `create_message` calls.
    pub fn create_message_calls(&self) -> usize {
        self.calls
            .read()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, MockCall::CreateMessage { .. }))
            .count()
    }

    fn record(&self, call: MockCall) {
        self.calls.write().unwrap().push(call);
    }

    fn resolve_text(&self, request: &MessageRequest) -> String {
        let haystack: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (needle, text) in self.responses.read().unwrap().iter() {
            if haystack.contains(needle.as_str()) {
                return text.clone();
            }
        }
        self.default_text.read().unwrap().clone()
    }

    fn build_response(&self, request: &MessageRequest) -> MessageResponse {
        MessageResponse {
            id: "msg_mock".to_string(),
            model: request.model.clone(),
            content: vec![ContentBlock::text(self.resolve_text(request))],
            stop_reason: Some("end_turn".to_string()),
            usage: *self.usage.read().unwrap(),
        }
    }
}

#[async_trait]
impl Client for MockClient {
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        self.record(MockCall::CreateMessage {
            model: request.model.clone(),
        });

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(ClientError::Api {
                status: 503,
                message: "mock overload".to_string(),
            });
        }

        Ok(self.build_response(request))
    }

    async fn create_batch(&self, items: &[BatchRequestItem]) -> Result<Batch> {
        self.record(MockCall::CreateBatch { items: items.len() });

        let id = format!("batch_{}", self.batch_seq.fetch_add(1, Ordering::SeqCst));
        self.batches
            .write()
            .unwrap()
            .insert(id.clone(), items.to_vec());

        Ok(Batch {
            id,
            processing_status: BatchStatus::InProgress,
            request_counts: BatchRequestCounts {
                processing: items.len() as u64,
                ..Default::default()
            },
            results_url: None,
        })
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Batch> {
        self.record(MockCall::GetBatch {
            batch_id: batch_id.to_string(),
        });

        let pending = self.pending_polls.load(Ordering::SeqCst);
        let status = if pending > 0 {
            self.pending_polls.store(pending - 1, Ordering::SeqCst);
            BatchStatus::InProgress
        } else {
            *self.terminal_status.read().unwrap()
        };

        Ok(Batch {
            id: batch_id.to_string(),
            processing_status: status,
            request_counts: BatchRequestCounts::default(),
            results_url: None,
        })
    }

    async fn get_batch_results(&self, batch_id: &str) -> Result<Box<dyn BatchResults>> {
        self.record(MockCall::GetBatchResults {
            batch_id: batch_id.to_string(),
        });

        let items = self
            .batches
            .read()
            .unwrap()
            .get(batch_id)
            .cloned()
            .unwrap_or_default();

        let results: Vec<Result<BatchResultItem>> = items
            .iter()
            .map(|item| {
                Ok(BatchResultItem {
                    custom_id: item.custom_id.clone(),
                    result: BatchResult {
                        result_type: BatchResultType::Succeeded,
                        message: Some(self.build_response(&item.params)),
                        error: None,
                    },
                })
            })
            .collect();

        Ok(Box::new(VecBatchResults::new(results)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn request(content: &str) -> MessageRequest {
        MessageRequest::new("test-model", 256).message(Message::user(content))
    }

    #[tokio::test]
    async fn test_scripted_response_by_needle() {
        let mock = MockClient::new().with_answer(
            "assets under management",
            serde_json::json!("$2.4B"),
            0.9,
        );

        let response = mock
            .create_message(&request("What are the assets under management?"))
            .await
            .unwrap();
        assert!(response.text().contains("$2.4B"));

        let fallback = mock.create_message(&request("unrelated")).await.unwrap();
        assert!(fallback.text().contains("unknown"));
    }

    #[tokio::test]
    async fn test_transient_failures_then_success() {
        let mock = MockClient::new().with_transient_failures(2);

        assert!(mock.create_message(&request("q")).await.is_err());
        assert!(mock.create_message(&request("q")).await.is_err());
        assert!(mock.create_message(&request("q")).await.is_ok());
        assert_eq!(mock.create_message_calls(), 3);
    }

    #[tokio::test]
    async fn test_batch_round_trip() {
        let mock = MockClient::new().with_pending_polls(1);

        let batch = mock
            .create_batch(&[BatchRequestItem::new("q1", request("one"))])
            .await
            .unwrap();
        assert_eq!(batch.processing_status, BatchStatus::InProgress);

        let first = mock.get_batch(&batch.id).await.unwrap();
        assert_eq!(first.processing_status, BatchStatus::InProgress);
        let second = mock.get_batch(&batch.id).await.unwrap();
        assert_eq!(second.processing_status, BatchStatus::Ended);

        let mut results = mock.get_batch_results(&batch.id).await.unwrap();
        let item = results.next().await.unwrap().unwrap();
        assert_eq!(item.custom_id, "q1");
        assert!(results.next().await.is_none());
    }
}
