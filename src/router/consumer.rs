//! Queue consumer loop
//!
//! Pulls connector batches from the durable queue and hands them to the
//! router. Messages are acknowledged only after the fan-out completes, so
//! a crash mid-batch redelivers it (at-least-once; shards deduplicate by
//! URI). No ordering is assumed across queue batches.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::router::BatchRouter;
use crate::queue::{EventBatch, QueueClient};

/// Idle wait between fetch passes when the queue is empty or failing
const FETCH_IDLE_WAIT: Duration = Duration::from_millis(500);

/// How long one fetch pass waits for messages to arrive
const FETCH_EXPIRES: Duration = Duration::from_secs(5);

/// Spawn the router's consumer loop
pub fn spawn_consumer_task(
    queue: QueueClient,
    router: Arc<BatchRouter>,
    fetch_size: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        consumer_loop(queue, router, fetch_size).await;
    })
}

async fn consumer_loop(queue: QueueClient, router: Arc<BatchRouter>, fetch_size: usize) {
    info!(fetch_size, "Batch router consumer starting");

    let consumer = match queue.router_consumer().await {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to create router consumer, retrying");
            loop {
                tokio::time::sleep(Duration::from_secs(5)).await;
                match queue.router_consumer().await {
                    Ok(c) => break c,
                    Err(e) => warn!(error = %e, "Router consumer still unavailable"),
                }
            }
        }
    };

    loop {
        let fetch = consumer
            .fetch()
            .max_messages(fetch_size)
            .expires(FETCH_EXPIRES)
            .messages()
            .await;

        let mut messages = match fetch {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "Queue fetch failed");
                tokio::time::sleep(FETCH_IDLE_WAIT).await;
                continue;
            }
        };

        // Collect the whole fetch first: the queue batch (several connector
        // batches) is processed as one routing pass
        let mut raw_messages = Vec::new();
        let mut batches = Vec::new();
        while let Some(next) = messages.next().await {
            match next {
                Ok(msg) => {
                    match serde_json::from_slice::<EventBatch>(&msg.payload) {
                        Ok(batch) => {
                            debug!(batch_id = %batch.batch_id, events = batch.events.len(), "Dequeued event batch");
                            batches.push(batch);
                            raw_messages.push(msg);
                        }
                        Err(e) => {
                            // Unparseable payloads are acked away, they
                            // would never succeed on redelivery
                            warn!(error = %e, "Dropping undecodable queue message");
                            if let Err(e) = msg.ack().await {
                                warn!(error = %e, "Failed to ack poison message");
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Queue message error mid-fetch");
                    break;
                }
            }
        }

        if batches.is_empty() {
            tokio::time::sleep(FETCH_IDLE_WAIT).await;
            continue;
        }

        router.process(batches).await;

        // Fan-out done (failures logged and dropped inside): acknowledge
        for msg in raw_messages {
            if let Err(e) = msg.ack().await {
                warn!(error = %e, "Failed to ack queue message, it will be redelivered");
            }
        }
    }
}
