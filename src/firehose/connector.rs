//! Firehose stream connector
//!
//! Maintains at most one live jetstream connection. Every inbound event
//! advances the persisted cursor before anything else, so a crash resumes
//! at-or-before that event. Matching events are batched; a batch is flushed
//! to the durable queue when it reaches `batch_size` or when the idle flush
//! timer fires. A failed flush retains the batch for the next attempt.
//!
//! Connection loss is non-fatal: a single reconnect attempt is scheduled
//! after a fixed delay, idempotently (a pending reconnect is never
//! re-scheduled on top of another).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::cursor::CursorStore;
use super::event::{JetstreamEvent, PostEvent};
use crate::queue::{BatchSink, EventBatch};
use crate::types::Result;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connector configuration
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Jetstream endpoint, without query parameters
    pub jetstream_url: String,
    /// Record collection the subscription is filtered to
    pub post_collection: String,
    /// Flush when the in-memory batch reaches this many events
    pub batch_size: usize,
    /// Idle flush interval
    pub flush_interval: Duration,
    /// Fixed delay before a reconnect attempt
    pub reconnect_delay: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            jetstream_url: "wss://jetstream2.us-east.bsky.network/subscribe".to_string(),
            post_collection: "app.bsky.feed.post".to_string(),
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            reconnect_delay: Duration::from_secs(5),
        }
    }
}

/// Commands accepted by the connector task
enum Command {
    Start,
    Stop(oneshot::Sender<()>),
}

/// Live counters shared with the health endpoint
#[derive(Default)]
struct StatusInner {
    running: AtomicBool,
    connected: AtomicBool,
    events_seen: AtomicU64,
    events_matched: AtomicU64,
    batches_published: AtomicU64,
    flush_failures: AtomicU64,
}

/// Snapshot of connector state
#[derive(Debug, Clone)]
pub struct ConnectorStatus {
    pub running: bool,
    pub connected: bool,
    pub events_seen: u64,
    pub events_matched: u64,
    pub batches_published: u64,
    pub flush_failures: u64,
}

/// Handle to the singleton connector task
pub struct Connector {
    cmd_tx: mpsc::Sender<Command>,
    status: Arc<StatusInner>,
}

impl Connector {
    /// Spawn the connector task. The connection is not opened until
    /// `start()` is called.
    pub fn spawn(
        config: ConnectorConfig,
        node_id: Uuid,
        cursor: Arc<CursorStore>,
        sink: Arc<dyn BatchSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let status = Arc::new(StatusInner::default());

        let task_status = Arc::clone(&status);
        tokio::spawn(async move {
            connector_task(config, node_id, cursor, sink, cmd_rx, task_status).await;
        });

        Self { cmd_tx, status }
    }

    /// Open the firehose connection. No-op if already started.
    pub async fn start(&self) {
        let _ = self.cmd_tx.send(Command::Start).await;
    }

    /// Close the connection, cancel pending timers and flush whatever is
    /// currently batched. Returns once the final flush has been attempted.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop(tx)).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Current connector state
    pub fn status(&self) -> ConnectorStatus {
        ConnectorStatus {
            running: self.status.running.load(Ordering::Relaxed),
            connected: self.status.connected.load(Ordering::Relaxed),
            events_seen: self.status.events_seen.load(Ordering::Relaxed),
            events_matched: self.status.events_matched.load(Ordering::Relaxed),
            batches_published: self.status.batches_published.load(Ordering::Relaxed),
            flush_failures: self.status.flush_failures.load(Ordering::Relaxed),
        }
    }
}

/// In-memory event batch with the size-threshold decision
struct Batcher {
    events: Vec<PostEvent>,
    batch_size: usize,
}

impl Batcher {
    fn new(batch_size: usize) -> Self {
        Self {
            events: Vec::with_capacity(batch_size),
            batch_size,
        }
    }

    /// Append an event; returns true when the batch reached the size
    /// threshold and must be flushed immediately
    fn push(&mut self, event: PostEvent) -> bool {
        self.events.push(event);
        self.events.len() >= self.batch_size
    }

    fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn take(&mut self) -> Vec<PostEvent> {
        std::mem::take(&mut self.events)
    }

    /// Put an unpublished batch back, ahead of anything queued since
    fn restore(&mut self, mut events: Vec<PostEvent>) {
        events.append(&mut self.events);
        self.events = events;
    }
}

/// Flush the current batch to the sink. On failure the batch is restored
/// and retried on the next flush trigger, never in a tight loop.
async fn flush(
    batcher: &mut Batcher,
    sink: &Arc<dyn BatchSink>,
    node_id: Uuid,
    status: &StatusInner,
) -> bool {
    if batcher.is_empty() {
        return true;
    }

    let events = batcher.take();
    let count = events.len();
    let batch = EventBatch::new(node_id, events);
    let batch_id = batch.batch_id;

    match sink.publish_batch(&batch).await {
        Ok(()) => {
            status.batches_published.fetch_add(1, Ordering::Relaxed);
            debug!(%batch_id, count, "Flushed event batch to queue");
            true
        }
        Err(e) => {
            status.flush_failures.fetch_add(1, Ordering::Relaxed);
            warn!(%batch_id, count, error = %e, "Queue publish failed, retaining batch");
            batcher.restore(batch.events);
            false
        }
    }
}

/// Sleep until an optional deadline; pends forever when there is none so it
/// can sit in a select arm without a guard
async fn sleep_opt(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => futures::future::pending().await,
    }
}

/// Read the next frame from an optional socket
async fn next_frame(
    ws: &mut Option<WsStream>,
) -> Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match ws {
        Some(stream) => stream.next().await,
        None => futures::future::pending().await,
    }
}

/// The connector's single task: owns the socket, the batch, and both
/// timers. Both timers are cancel-and-reschedule, never additive.
async fn connector_task(
    config: ConnectorConfig,
    node_id: Uuid,
    cursor: Arc<CursorStore>,
    sink: Arc<dyn BatchSink>,
    mut cmd_rx: mpsc::Receiver<Command>,
    status: Arc<StatusInner>,
) {
    let mut batcher = Batcher::new(config.batch_size);
    let mut ws: Option<WsStream> = None;
    let mut flush_at: Option<Instant> = None;
    let mut reconnect_at: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Start) => {
                    if status.running.swap(true, Ordering::Relaxed) {
                        debug!("Connector already started");
                    } else if ws.is_none() && reconnect_at.is_none() {
                        // Immediate first connection attempt
                        reconnect_at = Some(Instant::now());
                    }
                }
                Some(Command::Stop(ack)) => {
                    status.running.store(false, Ordering::Relaxed);
                    reconnect_at = None;
                    flush_at = None;
                    if let Some(mut stream) = ws.take() {
                        let _ = stream.close(None).await;
                        status.connected.store(false, Ordering::Relaxed);
                    }
                    flush(&mut batcher, &sink, node_id, &status).await;
                    info!("Connector stopped");
                    let _ = ack.send(());
                }
                None => {
                    // Handle dropped; flush what we have and exit
                    flush(&mut batcher, &sink, node_id, &status).await;
                    return;
                }
            },

            frame = next_frame(&mut ws) => match frame {
                Some(Ok(Message::Text(raw))) => {
                    status.events_seen.fetch_add(1, Ordering::Relaxed);

                    // Malformed input is dropped, not an error
                    let event: JetstreamEvent = match serde_json::from_str(&raw) {
                        Ok(ev) => ev,
                        Err(e) => {
                            debug!(error = %e, "Dropping unparseable firehose event");
                            continue;
                        }
                    };

                    // Cursor first: resume point must cover this event
                    if let Err(e) = cursor.advance(event.time_us).await {
                        warn!(error = %e, "Failed to persist firehose cursor");
                    }

                    if let Some(post) = event.into_post_event(&config.post_collection) {
                        status.events_matched.fetch_add(1, Ordering::Relaxed);
                        if batcher.push(post) {
                            if flush(&mut batcher, &sink, node_id, &status).await {
                                flush_at = None;
                            } else {
                                flush_at = Some(Instant::now() + config.flush_interval);
                            }
                        } else if flush_at.is_none() {
                            flush_at = Some(Instant::now() + config.flush_interval);
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Some(stream) = ws.as_mut() {
                        let _ = stream.send(Message::Pong(data)).await;
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(?frame, "Firehose closed the connection");
                    ws = None;
                    status.connected.store(false, Ordering::Relaxed);
                    if status.running.load(Ordering::Relaxed) && reconnect_at.is_none() {
                        reconnect_at = Some(Instant::now() + config.reconnect_delay);
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "Firehose connection error");
                    ws = None;
                    status.connected.store(false, Ordering::Relaxed);
                    if status.running.load(Ordering::Relaxed) && reconnect_at.is_none() {
                        reconnect_at = Some(Instant::now() + config.reconnect_delay);
                    }
                }
                None => {
                    // Stream ended without a close frame
                    warn!("Firehose stream ended");
                    ws = None;
                    status.connected.store(false, Ordering::Relaxed);
                    if status.running.load(Ordering::Relaxed) && reconnect_at.is_none() {
                        reconnect_at = Some(Instant::now() + config.reconnect_delay);
                    }
                }
            },

            _ = sleep_opt(flush_at) => {
                if flush(&mut batcher, &sink, node_id, &status).await {
                    flush_at = None;
                } else {
                    // Retained batch: retry on the next interval
                    flush_at = Some(Instant::now() + config.flush_interval);
                }
            }

            _ = sleep_opt(reconnect_at) => {
                reconnect_at = None;
                if !status.running.load(Ordering::Relaxed) {
                    continue;
                }
                let url = subscribe_url(&config, cursor.position());
                info!(url = %url, "Connecting to jetstream");
                match connect_async(&url).await {
                    Ok((stream, _)) => {
                        info!("Jetstream connected");
                        ws = Some(stream);
                        status.connected.store(true, Ordering::Relaxed);
                    }
                    Err(e) => {
                        error!(error = %e, "Jetstream connect failed, retrying in {:?}", config.reconnect_delay);
                        reconnect_at = Some(Instant::now() + config.reconnect_delay);
                    }
                }
            }
        }
    }
}

/// Build the subscription URL with the collection filter and resume cursor
fn subscribe_url(config: &ConnectorConfig, cursor: Option<u64>) -> String {
    let mut url = format!(
        "{}?wanted_collections={}",
        config.jetstream_url, config.post_collection
    );
    if let Some(c) = cursor {
        url.push_str(&format!("&cursor={}", c));
    }
    url
}
