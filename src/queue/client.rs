//! NATS JetStream client wrapper
//!
//! Provides connection management, stream provisioning for the event
//! queue, the publish path used by the connector and the durable pull
//! consumer used by the router.

use std::time::Duration;

use async_nats::jetstream::{self, consumer};
use async_trait::async_trait;
use tracing::info;

use super::messages::EventBatch;
use super::sink::BatchSink;
use crate::config::NatsArgs;
use crate::types::{AtrariumError, Result};

/// JetStream stream holding connector batches
pub const EVENT_STREAM_NAME: &str = "ATRARIUM_EVENTS";

/// Subject connector batches are published to
pub const EVENT_SUBJECT: &str = "atrarium.events";

/// Durable consumer name for the batch router
pub const ROUTER_CONSUMER_NAME: &str = "atrarium-router";

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// How long the queue retains unconsumed batches
const STREAM_MAX_AGE: Duration = Duration::from_secs(24 * 3600);

/// Upper bound on queued batch bytes
const STREAM_MAX_BYTES: i64 = 512 * 1024 * 1024;

/// NATS client wrapper with the event stream provisioned
#[derive(Clone)]
pub struct QueueClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    name: String,
}

impl QueueClient {
    /// Connect to NATS and ensure the event stream exists
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self> {
        info!("Connecting to NATS at {}", args.nats_url);

        let mut options = async_nats::ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| AtrariumError::Nats(format!("Failed to connect: {}", e)))?;

        let jetstream = jetstream::new(client.clone());

        let queue = Self {
            client,
            jetstream,
            name: name.to_string(),
        };
        queue.ensure_stream().await?;

        info!("Connected to NATS at {}", args.nats_url);
        Ok(queue)
    }

    /// Ensure the event stream exists (file storage - batches survive a
    /// NATS restart, which is what makes the queue the durable hand-off)
    async fn ensure_stream(&self) -> Result<()> {
        self.jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: EVENT_STREAM_NAME.to_string(),
                subjects: vec![EVENT_SUBJECT.to_string()],
                max_age: STREAM_MAX_AGE,
                max_bytes: STREAM_MAX_BYTES,
                storage: jetstream::stream::StorageType::File,
                ..Default::default()
            })
            .await
            .map_err(|e| AtrariumError::Nats(format!("Failed to create stream: {}", e)))?;

        info!("Using stream {} for event batches", EVENT_STREAM_NAME);
        Ok(())
    }

    /// Create (or resume) the router's durable pull consumer
    pub async fn router_consumer(&self) -> Result<consumer::PullConsumer> {
        let stream = self
            .jetstream
            .get_stream(EVENT_STREAM_NAME)
            .await
            .map_err(|e| AtrariumError::Nats(format!("Failed to get stream: {}", e)))?;

        stream
            .get_or_create_consumer(
                ROUTER_CONSUMER_NAME,
                consumer::pull::Config {
                    durable_name: Some(ROUTER_CONSUMER_NAME.to_string()),
                    ack_policy: consumer::AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| AtrariumError::Nats(format!("Failed to create consumer: {}", e)))
    }

    /// Flush pending publishes
    pub async fn flush(&self) -> Result<()> {
        self.client
            .flush()
            .await
            .map_err(|e| AtrariumError::Nats(format!("Flush failed: {}", e)))
    }

    /// Whether the underlying connection is currently up
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }

    /// Get the client name
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl BatchSink for QueueClient {
    async fn publish_batch(&self, batch: &EventBatch) -> Result<()> {
        let payload = serde_json::to_vec(batch)?;

        // Double await: the second waits for the JetStream ack, so an Ok
        // here means the batch is durably stored
        self.jetstream
            .publish(EVENT_SUBJECT, payload.into())
            .await
            .map_err(|e| AtrariumError::Nats(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| AtrariumError::Nats(format!("Publish not acknowledged: {}", e)))?;

        Ok(())
    }
}
