//! Feed protocol endpoint
//!
//! GET /xrpc/app.bsky.feed.getFeedSkeleton?feed=...&limit=...&cursor=...
//!
//! `feed` is either an at:// feed generator URI whose record key is the
//! community's shard key, or the bare shard key itself. The response is
//! the ordered URI list plus an opaque resume cursor.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::server::http::{bad_request_response, json_response, not_found_response};
use crate::server::AppState;
use crate::shard::is_valid_shard_key;

const DEFAULT_LIMIT: usize = 50;

#[derive(Deserialize)]
struct FeedSkeletonQuery {
    feed: String,
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Serialize)]
struct FeedSkeletonResponse {
    posts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cursor: Option<String>,
}

/// Resolve a feed reference to a community shard key
fn resolve_feed_ref(feed: &str) -> Option<&str> {
    let key = if feed.starts_with("at://") {
        feed.rsplit('/').next()?
    } else {
        feed
    };
    is_valid_shard_key(key).then_some(key)
}

/// Handle GET /xrpc/app.bsky.feed.getFeedSkeleton
pub async fn handle_feed_skeleton(
    state: Arc<AppState>,
    query: Option<&str>,
) -> Response<Full<Bytes>> {
    let params: FeedSkeletonQuery = match serde_urlencoded::from_str(query.unwrap_or("")) {
        Ok(p) => p,
        Err(e) => return bad_request_response(&format!("invalid query: {}", e)),
    };

    let Some(shard_key) = resolve_feed_ref(&params.feed) else {
        return bad_request_response("feed does not resolve to a community");
    };

    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let page = match state
        .feed
        .get_skeleton(shard_key, limit, params.cursor.as_deref())
        .await
    {
        Ok(Some(page)) => page,
        Ok(None) => return not_found_response(&format!("/xrpc feed {}", shard_key)),
        Err(e) => {
            warn!(shard = %shard_key, error = %e, "Feed skeleton request failed");
            return bad_request_response(&e.to_string());
        }
    };

    let body = FeedSkeletonResponse {
        posts: page.posts,
        cursor: page.cursor,
    };
    match serde_json::to_string(&body) {
        Ok(json) => json_response(StatusCode::OK, json),
        Err(e) => json_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!(r#"{{"error":"serialization failed: {}"}}"#, e),
        ),
    }
}
