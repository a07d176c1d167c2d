//! Request and response types for the messages and message-batches APIs.

use serde::{Deserialize, Serialize};

// =============================================================================
// Messages
// =============================================================================

/// A single message request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRequest {
    /// Model identifier (e.g. "claude-3-5-haiku-latest")
    pub model: String,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// System prompt blocks (cacheable prefixes go first)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub system: Vec<SystemBlock>,

    /// Conversation messages
    pub messages: Vec<Message>,

    /// Sampling temperature (0.0 to 1.0)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl MessageRequest {
    /// Create a new request with the given model.
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
            system: Vec::new(),
            messages: Vec::new(),
            temperature: None,
        }
    }

    /// Add a system block.
    pub fn system(mut self, block: SystemBlock) -> Self {
        self.system.push(block);
        self
    }

    /// Add a message.
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the temperature.
    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// A system prompt block, optionally marked cacheable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Block type, always "text"
    #[serde(rename = "type")]
    pub block_type: String,

    /// Block content
    pub text: String,

    /// Cache marker; present on the last block of a cacheable prefix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl SystemBlock {
    /// Create a plain (uncached) system block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
            cache_control: None,
        }
    }

    /// Mark this block as a cacheable prefix boundary.
    pub fn cached(mut self, control: CacheControl) -> Self {
        self.cache_control = Some(control);
        self
    }
}

/// Prompt-cache control for a system block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheControl {
    /// Control type, always "ephemeral"
    #[serde(rename = "type")]
    pub control_type: String,

    /// Cache entry lifetime: "5m" (default) or "1h"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

impl CacheControl {
    /// Five-minute ephemeral cache entry.
    pub fn five_minutes() -> Self {
        Self {
            control_type: "ephemeral".to_string(),
            ttl: None,
        }
    }

    /// One-hour ephemeral cache entry.
    pub fn one_hour() -> Self {
        Self {
            control_type: "ephemeral".to_string(),
            ttl: Some("1h".to_string()),
        }
    }
}

/// A conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role: "user" or "assistant"
    pub role: String,

    /// Message content
    pub content: String,
}

impl Message {
    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Response to a message request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Response id
    #[serde(default)]
    pub id: String,

    /// Model that produced the response
    #[serde(default)]
    pub model: String,

    /// Content blocks
    #[serde(default)]
    pub content: Vec<ContentBlock>,

    /// Why generation stopped ("end_turn", "max_tokens", ...)
    #[serde(default)]
    pub stop_reason: Option<String>,

    /// Token accounting
    #[serde(default)]
    pub usage: TokenUsage,
}

impl MessageResponse {
    /// Concatenate all text blocks into a single string.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.block_type == "text")
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Whether generation was cut off by the token limit.
    pub fn truncated(&self) -> bool {
        self.stop_reason.as_deref() == Some("max_tokens")
    }
}

/// A response content block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    /// Block type ("text", "thinking", ...)
    #[serde(rename = "type")]
    pub block_type: String,

    /// Text payload for "text" blocks
    #[serde(default)]
    pub text: String,
}

impl ContentBlock {
    /// Create a text block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: text.into(),
        }
    }
}

/// Token accounting for a request, including prompt-cache traffic.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Uncached input tokens
    #[serde(default)]
    pub input_tokens: u64,

    /// Generated tokens
    #[serde(default)]
    pub output_tokens: u64,

    /// Tokens written into the prompt cache
    #[serde(default)]
    pub cache_creation_input_tokens: u64,

    /// Tokens served from the prompt cache
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cache_creation_input_tokens += other.cache_creation_input_tokens;
        self.cache_read_input_tokens += other.cache_read_input_tokens;
    }

    /// Total tokens moved, in any direction.
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_input_tokens
            + self.cache_read_input_tokens
    }
}

// =============================================================================
// Message batches
// =============================================================================

/// One entry in a submitted batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequestItem {
    /// Caller-chosen id, echoed back on the result item
    pub custom_id: String,

    /// The request to execute
    pub params: MessageRequest,
}

impl BatchRequestItem {
    /// Create a batch item.
    pub fn new(custom_id: impl Into<String>, params: MessageRequest) -> Self {
        Self {
            custom_id: custom_id.into(),
            params,
        }
    }
}

/// Processing status of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    InProgress,
    Canceling,
    Ended,
    Canceled,
    Expired,
}

impl BatchStatus {
    /// Whether the batch has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::InProgress)
    }
}

/// A submitted batch handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    /// Batch id
    pub id: String,

    /// Current processing status
    pub processing_status: BatchStatus,

    /// Per-outcome request counts
    #[serde(default)]
    pub request_counts: BatchRequestCounts,

    /// Where to fetch results once ended
    #[serde(default)]
    pub results_url: Option<String>,
}

/// Request counts reported on a batch handle.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct BatchRequestCounts {
    #[serde(default)]
    pub processing: u64,
    #[serde(default)]
    pub succeeded: u64,
    #[serde(default)]
    pub errored: u64,
    #[serde(default)]
    pub canceled: u64,
    #[serde(default)]
    pub expired: u64,
}

/// Per-item outcome type in the batch results stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchResultType {
    Succeeded,
    Errored,
    Canceled,
    Expired,
}

/// One line of the batch results stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResultItem {
    /// Echo of the submitted custom_id
    pub custom_id: String,

    /// Outcome payload
    pub result: BatchResult,
}

/// Outcome payload of a batch result item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResult {
    /// Outcome type
    #[serde(rename = "type")]
    pub result_type: BatchResultType,

    /// Present when the item succeeded
    #[serde(default)]
    pub message: Option<MessageResponse>,

    /// Present when the item errored
    #[serde(default)]
    pub error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_text_concatenates_text_blocks() {
        let response = MessageResponse {
            id: "msg_1".into(),
            model: "m".into(),
            content: vec![
                ContentBlock::text("Hello, "),
                ContentBlock {
                    block_type: "thinking".into(),
                    text: "ignored".into(),
                },
                ContentBlock::text("world"),
            ],
            stop_reason: Some("end_turn".into()),
            usage: TokenUsage::default(),
        };
        assert_eq!(response.text(), "Hello, world");
        assert!(!response.truncated());
    }

    #[test]
    fn test_usage_add() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
            cache_creation_input_tokens: 100,
            cache_read_input_tokens: 0,
        });
        total.add(&TokenUsage {
            input_tokens: 1,
            output_tokens: 2,
            cache_creation_input_tokens: 0,
            cache_read_input_tokens: 100,
        });
        assert_eq!(total.input_tokens, 11);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.total(), 218);
    }

    #[test]
    fn test_batch_status_serde() {
        let status: BatchStatus = serde_json::from_str("\"in_progress\"").unwrap();
        assert_eq!(status, BatchStatus::InProgress);
        assert!(!status.is_terminal());
        assert!(BatchStatus::Ended.is_terminal());
        assert_eq!(serde_json::to_string(&BatchStatus::Ended).unwrap(), "\"ended\"");
    }

    #[test]
    fn test_cache_control_serialization() {
        let block = SystemBlock::text("context").cached(CacheControl::one_hour());
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["cache_control"]["type"], "ephemeral");
        assert_eq!(json["cache_control"]["ttl"], "1h");

        let plain = SystemBlock::text("context");
        let json = serde_json::to_value(&plain).unwrap();
        assert!(json.get("cache_control").is_none());
    }
}
