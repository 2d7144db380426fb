//! Configuration for Atrarium
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use uuid::Uuid;

/// Atrarium - community feed indexer for the AT Protocol firehose
#[derive(Parser, Debug, Clone)]
#[command(name = "atrarium")]
#[command(about = "Community feed indexer for the AT Protocol firehose")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on for the feed/admin HTTP API
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Jetstream WebSocket URL (the upstream firehose)
    #[arg(
        long,
        env = "JETSTREAM_URL",
        default_value = "wss://jetstream2.us-east.bsky.network/subscribe"
    )]
    pub jetstream_url: String,

    /// Record collection the firehose subscription is filtered to
    #[arg(long, env = "POST_COLLECTION", default_value = "app.bsky.feed.post")]
    pub post_collection: String,

    /// Path to the persisted firehose resume cursor
    #[arg(long, env = "CURSOR_PATH", default_value = "atrarium-cursor")]
    pub cursor_path: String,

    /// Whether this instance runs the firehose connector
    /// When false, the instance only consumes the queue and serves feeds
    #[arg(long, env = "INGEST_ENABLED", default_value = "true")]
    pub ingest_enabled: bool,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Maximum events buffered by the connector before a size-triggered flush
    #[arg(long, env = "CONNECTOR_BATCH_SIZE", default_value = "100")]
    pub connector_batch_size: usize,

    /// Connector idle flush interval in milliseconds
    #[arg(long, env = "CONNECTOR_FLUSH_MS", default_value = "5000")]
    pub connector_flush_ms: u64,

    /// Delay before a reconnect attempt after the firehose drops, in milliseconds
    #[arg(long, env = "RECONNECT_DELAY_MS", default_value = "5000")]
    pub reconnect_delay_ms: u64,

    /// Maximum queue messages fetched per router pass
    #[arg(long, env = "ROUTER_FETCH_SIZE", default_value = "16")]
    pub router_fetch_size: usize,

    /// Hydration limit cap for getFeedSkeleton requests
    #[arg(long, env = "FEED_MAX_LIMIT", default_value = "100")]
    pub feed_max_limit: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.connector_batch_size == 0 {
            return Err("CONNECTOR_BATCH_SIZE must be at least 1".to_string());
        }
        if self.router_fetch_size == 0 {
            return Err("ROUTER_FETCH_SIZE must be at least 1".to_string());
        }
        if self.feed_max_limit == 0 {
            return Err("FEED_MAX_LIMIT must be at least 1".to_string());
        }
        if !self.jetstream_url.starts_with("ws://") && !self.jetstream_url.starts_with("wss://") {
            return Err("JETSTREAM_URL must be a ws:// or wss:// URL".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> Args {
        Args::parse_from(["atrarium"])
    }

    #[test]
    fn test_validate_rejects_http_url() {
        let mut a = args();
        a.jetstream_url = "https://example.com".to_string();
        assert!(a.validate().is_err());
    }

    #[test]
    fn test_defaults_pass_validation() {
        assert!(args().validate().is_ok());
    }
}
