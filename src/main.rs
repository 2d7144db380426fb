//! Atrarium - community feed indexer for the AT Protocol firehose

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atrarium::{
    config::Args,
    firehose::{Connector, ConnectorConfig, CursorStore},
    queue::{BatchSink, QueueClient},
    router::{spawn_consumer_task, BatchRouter},
    server::{self, AppState},
    shard::ShardRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    // Parse command line arguments
    let args = Args::parse();

    // Initialize tracing/logging
    let log_level = args.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("atrarium={},info", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Validate configuration
    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    // Print startup banner
    info!("======================================");
    info!("  Atrarium - community feed indexer");
    info!("======================================");
    info!("Node ID: {}", args.node_id);
    info!("Listen: {}", args.listen);
    info!("Jetstream: {}", args.jetstream_url);
    info!("Collection: {}", args.post_collection);
    info!("Cursor file: {}", args.cursor_path);
    info!("NATS: {}", args.nats.nats_url);
    info!(
        "Ingest: {}",
        if args.ingest_enabled { "ENABLED" } else { "disabled (query-only)" }
    );
    info!("======================================");

    // Connect to NATS; without the queue the instance serves feeds from
    // whatever shard state it accumulates but neither ingests nor routes
    let queue = match QueueClient::new(&args.nats, &format!("atrarium-{}", args.node_id)).await {
        Ok(client) => Some(client),
        Err(e) => {
            warn!("NATS connection failed (continuing in degraded mode): {}", e);
            None
        }
    };

    let shards = Arc::new(ShardRegistry::new());
    let router = Arc::new(BatchRouter::new(Arc::clone(&shards)));

    // Router consumer: pulls connector batches off the queue and fans
    // them out to shards
    if let Some(queue) = &queue {
        spawn_consumer_task(queue.clone(), Arc::clone(&router), args.router_fetch_size);
    }

    // Firehose connector: one supervised instance per ingest node
    let connector = match (&queue, args.ingest_enabled) {
        (Some(queue), true) => {
            let cursor = Arc::new(CursorStore::open(&args.cursor_path).await?);
            if let Some(resume) = cursor.position() {
                info!("Resuming firehose from cursor {}", resume);
            }

            let sink: Arc<dyn BatchSink> = Arc::new(queue.clone());
            let connector = Connector::spawn(
                ConnectorConfig {
                    jetstream_url: args.jetstream_url.clone(),
                    post_collection: args.post_collection.clone(),
                    batch_size: args.connector_batch_size,
                    flush_interval: Duration::from_millis(args.connector_flush_ms),
                    reconnect_delay: Duration::from_millis(args.reconnect_delay_ms),
                },
                args.node_id,
                cursor,
                sink,
            );
            connector.start().await;
            Some(connector)
        }
        (None, true) => {
            warn!("Ingest requested but the queue is unavailable, connector not started");
            None
        }
        _ => None,
    };

    let state = Arc::new(AppState::new(args, queue, shards, connector, router));

    // Serve until a shutdown signal; the connector gets a final flush so
    // the last partial batch is not lost
    let server_state = Arc::clone(&state);
    tokio::select! {
        result = server::run(server_state) => {
            if let Err(e) = result {
                error!("Server error: {:?}", e);
                std::process::exit(1);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            if let Some(connector) = &state.connector {
                connector.stop().await;
            }
        }
    }

    info!("Atrarium stopped");
    Ok(())
}
