//! Shared error and result types

use thiserror::Error;

/// Errors surfaced by Atrarium subsystems.
///
/// Per the recovery policy, most of these never propagate past the
/// component that can locally recover: the connector retries its own
/// connection, the router isolates per-shard failures. Variants exist so
/// the recovering component can log what actually went wrong.
#[derive(Error, Debug)]
pub enum AtrariumError {
    /// NATS / JetStream failure (connect, publish, consume)
    #[error("NATS error: {0}")]
    Nats(String),

    /// Firehose connection or protocol failure
    #[error("Firehose error: {0}")]
    Firehose(String),

    /// A shard actor is unreachable or its command loop has exited
    #[error("Shard error: {0}")]
    Shard(String),

    /// Malformed feed request or paging cursor
    #[error("Invalid feed request: {0}")]
    Feed(String),

    /// Cursor file or other local I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, AtrariumError>;
