//! Publish-side seam between the connector and the queue

use async_trait::async_trait;

use super::messages::EventBatch;
use crate::types::Result;

/// Destination for connector flushes.
///
/// Production uses the JetStream-backed `QueueClient`; tests substitute an
/// in-memory sink so the batching behavior can be exercised without NATS.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Publish one batch durably. An error means the batch was NOT accepted
    /// and the connector must retain it for the next flush attempt.
    async fn publish_batch(&self, batch: &EventBatch) -> Result<()>;
}
