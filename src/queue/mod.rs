//! Durable event queue over NATS JetStream
//!
//! The queue is the only resource with multiple writers (the connector's
//! repeated flushes) and a single consumer (the router). Delivery is
//! at-least-once; everything downstream is duplicate-tolerant.

pub mod client;
pub mod messages;
pub mod sink;

pub use client::{QueueClient, EVENT_STREAM_NAME, EVENT_SUBJECT, ROUTER_CONSUMER_NAME};
pub use messages::EventBatch;
pub use sink::BatchSink;
