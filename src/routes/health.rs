//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - liveness (is the process running?)
//! - /ready, /readyz - readiness (can it index and serve traffic?)
//!
//! Liveness always returns 200. Readiness requires the durable queue
//! connection; a query-only instance without ingest still needs the queue
//! to consume batches, so the check is the same for both roles.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::server::http::json_response;
use crate::server::AppState;

/// Health response consumed by probes and the operator dashboard
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' when the queue is connected, 'degraded' otherwise
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub node_id: String,
    pub timestamp: String,
    pub queue: QueueHealth,
    pub firehose: Option<FirehoseHealth>,
    pub shards: ShardsHealth,
    pub router: crate::router::RouterStats,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueHealth {
    pub connected: bool,
}

/// Connector counters; absent on query-only instances
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FirehoseHealth {
    pub running: bool,
    pub connected: bool,
    pub events_seen: u64,
    pub events_matched: u64,
    pub batches_published: u64,
    pub flush_failures: u64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardsHealth {
    pub live: usize,
}

fn build_health_response(state: &AppState) -> HealthResponse {
    let queue_connected = state.queue.as_ref().is_some_and(|q| q.is_connected());

    let firehose = state.connector.as_ref().map(|c| {
        let s = c.status();
        FirehoseHealth {
            running: s.running,
            connected: s.connected,
            events_seen: s.events_seen,
            events_matched: s.events_matched,
            batches_published: s.batches_published,
            flush_failures: s.flush_failures,
        }
    });

    HealthResponse {
        healthy: true,
        status: if queue_connected { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        node_id: state.args.node_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        queue: QueueHealth {
            connected: queue_connected,
        },
        firehose,
        shards: ShardsHealth {
            live: state.shards.len(),
        },
        router: state.router.stats(),
    }
}

/// Handle liveness probe (/health, /healthz)
pub fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);
    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());
    json_response(StatusCode::OK, body)
}

/// Handle readiness probe (/ready, /readyz)
pub fn readiness_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = build_health_response(&state);
    let status = if response.queue.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());
    json_response(status, body)
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        service: "atrarium",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown"}"#.to_string());
    json_response(StatusCode::OK, body)
}
