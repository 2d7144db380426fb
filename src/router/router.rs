//! Fan-out from event batches to community shards
//!
//! For each event the router re-checks the structural filter (batches may
//! be replayed, or predate a filter change), extracts every community tag,
//! groups the work per destination shard and issues the indexing calls
//! concurrently. One unreachable shard never blocks or fails indexing into
//! any other shard: its calls are logged, counted and dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use super::tags::extract_shard_keys;
use crate::firehose::{PostEvent, COMMUNITY_TAG_PREFIX};
use crate::queue::EventBatch;
use crate::shard::{IndexOutcome, ShardRegistry};

/// Live router counters
#[derive(Default)]
struct StatsInner {
    batches_processed: AtomicU64,
    events_processed: AtomicU64,
    events_skipped: AtomicU64,
    indexing_calls: AtomicU64,
    indexing_failures: AtomicU64,
}

/// Snapshot of router activity
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub batches_processed: u64,
    pub events_processed: u64,
    pub events_skipped: u64,
    pub indexing_calls: u64,
    pub indexing_failures: u64,
}

/// Routes queued batches into shard indexing calls
pub struct BatchRouter {
    shards: Arc<ShardRegistry>,
    stats: StatsInner,
}

impl BatchRouter {
    pub fn new(shards: Arc<ShardRegistry>) -> Self {
        Self {
            shards,
            stats: StatsInner::default(),
        }
    }

    /// Process one queue fetch worth of connector batches
    pub async fn process(&self, batches: Vec<EventBatch>) {
        // Group (shard key -> posts) across the whole fetch, preserving
        // arrival order within each destination
        let mut grouped: HashMap<String, Vec<PostEvent>> = HashMap::new();

        for batch in batches {
            self.stats.batches_processed.fetch_add(1, Ordering::Relaxed);
            for event in batch.events {
                self.stats.events_processed.fetch_add(1, Ordering::Relaxed);

                // Defense in depth: the connector already filtered, but a
                // replayed batch may be out of sync with the filter
                if event.text.is_empty() || !event.text.contains(COMMUNITY_TAG_PREFIX) {
                    self.stats.events_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }

                let keys = extract_shard_keys(&event.text);
                if keys.is_empty() {
                    self.stats.events_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                for key in keys {
                    grouped.entry(key).or_default().push(event.clone());
                }
            }
        }

        if grouped.is_empty() {
            return;
        }

        // One future per destination: destinations run concurrently, posts
        // for the same destination stay in order through its serialized actor
        let calls = grouped.into_iter().map(|(shard_key, posts)| {
            let shard = self.shards.get_or_create(&shard_key);
            let stats = &self.stats;
            async move {
                for post in posts {
                    stats.indexing_calls.fetch_add(1, Ordering::Relaxed);
                    let uri = post.uri.clone();
                    match shard.index_post(post).await {
                        Ok(outcome) => {
                            if outcome == IndexOutcome::Indexed {
                                debug!(shard = %shard_key, %uri, "Post indexed");
                            }
                        }
                        Err(e) => {
                            // Dropped, no retry: the consistency gap is
                            // bounded to this one community's update
                            stats.indexing_failures.fetch_add(1, Ordering::Relaxed);
                            warn!(shard = %shard_key, %uri, error = %e, "Indexing call failed, dropping");
                        }
                    }
                }
            }
        });

        join_all(calls).await;
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            batches_processed: self.stats.batches_processed.load(Ordering::Relaxed),
            events_processed: self.stats.events_processed.load(Ordering::Relaxed),
            events_skipped: self.stats.events_skipped.load(Ordering::Relaxed),
            indexing_calls: self.stats.indexing_calls.load(Ordering::Relaxed),
            indexing_failures: self.stats.indexing_failures.load(Ordering::Relaxed),
        }
    }
}
