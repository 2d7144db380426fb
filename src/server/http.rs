//! HTTP server implementation
//!
//! hyper http1 with TokioIo, one spawned task per connection and a manual
//! (method, path) dispatch. Two surfaces share the listener: the feed
//! protocol endpoint under /xrpc and the administrative API under /api.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::config::Args;
use crate::feed::{FeedSkeletonService, GlobalFeedSource, NoGlobalFeed};
use crate::firehose::Connector;
use crate::queue::QueueClient;
use crate::router::BatchRouter;
use crate::routes;
use crate::shard::ShardRegistry;
use crate::types::AtrariumError;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Shared application state
pub struct AppState {
    pub args: Args,
    /// Durable queue client; absent when NATS is unreachable at startup
    pub queue: Option<QueueClient>,
    /// Live community shards
    pub shards: Arc<ShardRegistry>,
    /// Read-side feed assembly
    pub feed: FeedSkeletonService,
    /// Firehose connector handle; absent on query-only instances
    pub connector: Option<Connector>,
    /// Router counters for the status surface
    pub router: Arc<BatchRouter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        args: Args,
        queue: Option<QueueClient>,
        shards: Arc<ShardRegistry>,
        connector: Option<Connector>,
        router: Arc<BatchRouter>,
    ) -> Self {
        // No network-wide candidate source is wired in this deployment;
        // graduated communities just serve shorter pages for that slice
        let global: Arc<dyn GlobalFeedSource> = Arc::new(NoGlobalFeed);
        let feed = FeedSkeletonService::new(Arc::clone(&shards), global, args.feed_max_limit);
        Self {
            args,
            queue,
            shards,
            feed,
            connector,
            router,
            started_at: Instant::now(),
        }
    }
}

/// Start the HTTP server
pub async fn run(state: Arc<AppState>) -> crate::types::Result<()> {
    let listener = TcpListener::bind(state.args.listen).await?;

    info!(
        "Atrarium listening on {} as node {}",
        state.args.listen, state.args.node_id
    );

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                        error!("Error serving connection from {}: {:?}", addr, err);
                    }
                });
            }
            Err(e) => {
                error!("Error accepting connection: {:?}", e);
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<BoxBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    debug!("[{}] {} {}", addr, method, path);

    let response = match (method, path.as_str()) {
        // Liveness probe
        (Method::GET, "/health") | (Method::GET, "/healthz") => {
            to_boxed(routes::health_check(Arc::clone(&state)))
        }

        // Readiness probe: requires the queue connection
        (Method::GET, "/ready") | (Method::GET, "/readyz") => {
            to_boxed(routes::readiness_check(Arc::clone(&state)))
        }

        // Version info for deployment verification
        (Method::GET, "/version") => to_boxed(routes::version_info()),

        // Feed protocol read contract
        (Method::GET, "/xrpc/app.bsky.feed.getFeedSkeleton") => to_boxed(
            routes::handle_feed_skeleton(Arc::clone(&state), query.as_deref()).await,
        ),

        // CORS preflight
        (Method::OPTIONS, _) => to_boxed(preflight_response()),

        // Administrative API: community config, membership, moderation,
        // hierarchy. Consumes the request for its body.
        (m, p) if p.starts_with("/api/communities/") => {
            let p = p.to_string();
            return Ok(to_boxed(
                routes::handle_community_request(Arc::clone(&state), m, &p, req).await,
            ));
        }

        (_, p) => to_boxed(not_found_response(p)),
    };

    Ok(response)
}

/// Read and buffer a request body
pub async fn read_body(req: Request<Incoming>) -> Result<Bytes, AtrariumError> {
    req.collect()
        .await
        .map(|collected| collected.to_bytes())
        .map_err(|e| AtrariumError::Internal(format!("failed to read request body: {}", e)))
}

/// Convert a Full<Bytes> body to BoxBody
pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed())
}

/// JSON response with an arbitrary status
pub fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .unwrap()
}

/// CORS preflight response
fn preflight_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Headers", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Not found response
pub fn not_found_response(path: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Not Found",
        "path": path,
    });
    json_response(StatusCode::NOT_FOUND, body.to_string())
}

/// Bad request response
pub fn bad_request_response(message: &str) -> Response<Full<Bytes>> {
    let body = serde_json::json!({
        "error": "Bad Request",
        "message": message,
    });
    json_response(StatusCode::BAD_REQUEST, body.to_string())
}
