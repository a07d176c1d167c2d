//! Vendor-abstract LLM client.
//!
//! A minimal transport layer for the two call shapes the research pipeline
//! uses: direct messages and deferred message batches, both with prompt-cache
//! aware system blocks.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm_client::{AnthropicClient, Client, Message, MessageRequest};
//!
//! let client = AnthropicClient::from_env()?;
//!
//! let response = client
//!     .create_message(
//!         &MessageRequest::new("claude-3-5-haiku-latest", 1024)
//!             .message(Message::user("Hello!")),
//!     )
//!     .await?;
//! println!("{}", response.text());
//! ```

pub mod anthropic;
pub mod client;
pub mod error;
pub mod mock;
pub mod types;

pub use anthropic::AnthropicClient;
pub use client::{BatchResults, Client, VecBatchResults};
pub use error::{ClientError, Result};
pub use mock::{MockCall, MockClient};
pub use types::{
    Batch, BatchRequestCounts, BatchRequestItem, BatchResult, BatchResultItem, BatchResultType,
    BatchStatus, CacheControl, ContentBlock, Message, MessageRequest, MessageResponse, SystemBlock,
    TokenUsage,
};
