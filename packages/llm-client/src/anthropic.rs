//! Reference HTTP implementation against the Anthropic messages API.

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Serialize;
use tracing::debug;

use crate::client::{BatchResults, Client, VecBatchResults};
use crate::error::{ClientError, Result};
use crate::types::{Batch, BatchRequestItem, BatchResultItem, MessageRequest, MessageResponse};

const API_VERSION: &str = "2023-06-01";

/// Anthropic messages + message-batches client.
#[derive(Clone)]
pub struct AnthropicClient {
    http: HttpClient,
    api_key: String,
    base_url: String,
}

impl AnthropicClient {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: HttpClient::new(),
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com/v1".to_string(),
        }
    }

    /// Create from the `ANTHROPIC_API_KEY` environment variable.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ClientError::Config("ANTHROPIC_API_KEY not set".into()))?;
        Ok(Self::new(api_key))
    }

    /// Set a custom base URL (for gateways and proxies).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    async fn post_json<B: Serialize, T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await?;

        Self::decode(response).await
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ClientError::Parse(e.to_string()))
    }
}

#[derive(Serialize)]
struct CreateBatchBody<'a> {
    requests: &'a [BatchRequestItem],
}

#[async_trait]
impl Client for AnthropicClient {
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse> {
        debug!(model = %request.model, "create_message");
        self.post_json("/messages", request).await
    }

    async fn create_batch(&self, items: &[BatchRequestItem]) -> Result<Batch> {
        debug!(items = items.len(), "create_batch");
        self.post_json("/messages/batches", &CreateBatchBody { requests: items })
            .await
    }

    async fn get_batch(&self, batch_id: &str) -> Result<Batch> {
        self.get_json(&format!("{}/messages/batches/{}", self.base_url, batch_id))
            .await
    }

    async fn get_batch_results(&self, batch_id: &str) -> Result<Box<dyn BatchResults>> {
        let batch = self.get_batch(batch_id).await?;
        let results_url = batch.results_url.unwrap_or_else(|| {
            format!("{}/messages/batches/{}/results", self.base_url, batch_id)
        });

        let response = self
            .http
            .get(&results_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status: status.as_u16(),
                message,
            });
        }

        // Results arrive as JSONL, one item per line.
        let body = response.text().await?;
        let items: Vec<Result<BatchResultItem>> = body
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<BatchResultItem>(line)
                    .map_err(|e| ClientError::Parse(e.to_string()))
            })
            .collect();

        Ok(Box::new(VecBatchResults::new(items)))
    }
}
