//! Batch router
//!
//! Turns queued event batches into per-community indexing calls. A single
//! post can carry several community tags (many-to-many fan-out); every
//! destination is called concurrently and fails independently.

pub mod consumer;
pub mod router;
pub mod tags;

pub use consumer::spawn_consumer_task;
pub use router::{BatchRouter, RouterStats};
pub use tags::extract_shard_keys;
