//! Atrarium - community feed indexer for the AT Protocol firehose
//!
//! Atrarium ingests the public jetstream of post events, extracts posts
//! tagged for specific communities via the `#atrarium_[8 hex]` convention,
//! and maintains per-community ordered post indexes that the feed skeleton
//! endpoint pages through.
//!
//! ## Pipeline
//!
//! - **Firehose**: single persistent jetstream connection with a persisted
//!   resume cursor, cheap pre-filter and batching
//! - **Queue**: NATS JetStream as the durable hand-off between the
//!   connector and the router (at-least-once)
//! - **Router**: structural filter, community-tag extraction, concurrent
//!   fan-out to shards with per-destination failure isolation
//! - **Shards**: one serialized actor per community owning config,
//!   membership, moderation log, hierarchy links and the post index
//! - **Feed**: stateless weighted merge producing `getFeedSkeleton` pages

pub mod config;
pub mod feed;
pub mod firehose;
pub mod queue;
pub mod router;
pub mod routes;
pub mod server;
pub mod shard;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{AtrariumError, Result};
