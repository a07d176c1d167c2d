//! The `Client` trait - the capability set the extraction engine needs.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Batch, BatchRequestItem, BatchResultItem, MessageRequest, MessageResponse};

/// Abstract LLM transport: direct messages plus deferred message batches.
///
/// Implementations wrap a specific vendor API. The engine only ever talks
/// through this trait, so tests can substitute a scripted mock.
#[async_trait]
pub trait Client: Send + Sync {
    /// Execute a single message request.
    async fn create_message(&self, request: &MessageRequest) -> Result<MessageResponse>;

    /// Submit a set of requests as one deferred batch.
    async fn create_batch(&self, items: &[BatchRequestItem]) -> Result<Batch>;

    /// Fetch the current status of a batch.
    async fn get_batch(&self, batch_id: &str) -> Result<Batch>;

    /// Open the results stream of an ended batch.
    async fn get_batch_results(&self, batch_id: &str) -> Result<Box<dyn BatchResults>>;
}

/// Pull-based iterator over batch result items.
///
/// `next` returns `None` once the stream is exhausted; a decode failure for
/// one line surfaces as `Some(Err(..))` and the stream remains usable.
#[async_trait]
pub trait BatchResults: Send {
    /// Advance to the next result item.
    async fn next(&mut self) -> Option<Result<BatchResultItem>>;
}

/// In-memory results stream over already-decoded lines.
///
/// Used by the HTTP client (which buffers the JSONL body) and by mocks.
pub struct VecBatchResults {
    items: std::vec::IntoIter<Result<BatchResultItem>>,
}

impl VecBatchResults {
    /// Wrap a list of decoded (or failed) items.
    pub fn new(items: Vec<Result<BatchResultItem>>) -> Self {
        Self {
            items: items.into_iter(),
        }
    }
}

#[async_trait]
impl BatchResults for VecBatchResults {
    async fn next(&mut self) -> Option<Result<BatchResultItem>> {
        self.items.next()
    }
}
