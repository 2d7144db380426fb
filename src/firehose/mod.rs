//! Firehose ingestion
//!
//! Owns the single persistent jetstream connection, the persisted resume
//! cursor, the cheap pre-filter and the connector-side batching.

pub mod connector;
pub mod cursor;
pub mod event;

pub use connector::{Connector, ConnectorConfig, ConnectorStatus};
pub use cursor::CursorStore;
pub use event::{CommitInfo, JetstreamEvent, PostEvent, PostRecord, COMMUNITY_TAG_PREFIX};
