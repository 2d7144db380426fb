//! Queue message envelopes
//!
//! One `EventBatch` is one connector flush. The router additionally fetches
//! several queue messages per pass, so batching happens at two independent
//! boundaries: events-per-flush (connection chatter) and messages-per-fetch
//! (queue round-trips). The two are tuned separately and never collapsed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::firehose::PostEvent;

/// One connector batch as published to the queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventBatch {
    /// Batch identity, for log correlation across publisher and consumer
    pub batch_id: Uuid,
    /// Node that published the batch
    pub node_id: Uuid,
    /// Publish wall-clock time
    pub published_at: DateTime<Utc>,
    /// Pre-filtered post events, in firehose arrival order
    pub events: Vec<PostEvent>,
}

impl EventBatch {
    pub fn new(node_id: Uuid, events: Vec<PostEvent>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            node_id,
            published_at: Utc::now(),
            events,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_round_trips_through_json() {
        let event = PostEvent {
            uri: "at://did:plc:a/app.bsky.feed.post/1".to_string(),
            cid: None,
            author_did: "did:plc:a".to_string(),
            text: "#atrarium_00000000".to_string(),
            created_at: Utc::now(),
            langs: vec![],
            has_media: false,
            time_us: 42,
        };
        let batch = EventBatch::new(Uuid::new_v4(), vec![event]);
        let bytes = serde_json::to_vec(&batch).unwrap();
        let parsed: EventBatch = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed.batch_id, batch.batch_id);
        assert_eq!(parsed.events.len(), 1);
        assert_eq!(parsed.events[0].time_us, 42);
    }
}
