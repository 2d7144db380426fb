//! Administrative API
//!
//! The write surface the community-management collaborator calls:
//!
//! - `GET  /api/communities/{key}` - config, counters, stage eligibility
//! - `GET  /api/communities/{key}/children` - linked child communities
//! - `GET  /api/communities/{key}/members/{did}` - membership check
//! - `POST /api/communities/{key}/config` - partial config overwrite
//! - `POST /api/communities/{key}/members` - membership upsert
//! - `POST /api/communities/{key}/moderation` - moderation action
//! - `POST /api/communities/{key}/children` - child-cache insert
//!
//! Value-level validation (name length, feed-mix sum, role rules) is the
//! caller's job; these handlers only check shapes and shard-key syntax.
//! Writes address shards by key and create them on first use; reads
//! return 404 for a community that has never been written.

use bytes::Bytes;
use chrono::Utc;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::server::http::{
    bad_request_response, json_response, not_found_response, read_body,
};
use crate::server::AppState;
use crate::shard::{is_valid_shard_key, ConfigPatch, MemberRole, ModerationAction};
use crate::types::AtrariumError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    actor_did: String,
    #[serde(default = "default_role")]
    role: MemberRole,
    #[serde(default = "default_active")]
    active: bool,
    joined_at: Option<chrono::DateTime<Utc>>,
}

fn default_role() -> MemberRole {
    MemberRole::Member
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddChildRequest {
    child_key: String,
}

/// Dispatch one /api/communities/* request
pub async fn handle_community_request(
    state: Arc<AppState>,
    method: Method,
    path: &str,
    req: Request<Incoming>,
) -> Response<Full<Bytes>> {
    let rest = path.strip_prefix("/api/communities/").unwrap_or("");
    let mut segments = rest.splitn(2, '/');
    let shard_key = segments.next().unwrap_or("");
    let op = segments.next().unwrap_or("");

    if !is_valid_shard_key(shard_key) {
        return bad_request_response("community key must be 8 lowercase hex characters");
    }

    let result = match (method, op) {
        (Method::GET, "") => handle_get_community(&state, shard_key).await,
        (Method::GET, "children") => handle_get_children(&state, shard_key).await,
        (Method::GET, rest) if rest.starts_with("members/") => {
            let actor_did = &rest["members/".len()..];
            handle_check_membership(&state, shard_key, actor_did).await
        }
        (Method::POST, "config") => handle_update_config(&state, shard_key, req).await,
        (Method::POST, "members") => handle_add_member(&state, shard_key, req).await,
        (Method::POST, "moderation") => handle_moderation(&state, shard_key, req).await,
        (Method::POST, "children") => handle_add_child(&state, shard_key, req).await,
        _ => return not_found_response(path),
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            warn!(shard = %shard_key, error = %e, "Community request failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({"error": e.to_string()}).to_string(),
            )
        }
    }
}

async fn handle_get_community(
    state: &AppState,
    shard_key: &str,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let Some(shard) = state.shards.get(shard_key) else {
        return Ok(not_found_response(&format!("/api/communities/{}", shard_key)));
    };
    let stats = shard.stats().await?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::to_string(&stats)?,
    ))
}

async fn handle_get_children(
    state: &AppState,
    shard_key: &str,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let Some(shard) = state.shards.get(shard_key) else {
        return Ok(not_found_response(&format!("/api/communities/{}", shard_key)));
    };
    let children = shard.get_children().await?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({"children": children}).to_string(),
    ))
}

async fn handle_check_membership(
    state: &AppState,
    shard_key: &str,
    actor_did: &str,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let Some(shard) = state.shards.get(shard_key) else {
        return Ok(not_found_response(&format!("/api/communities/{}", shard_key)));
    };
    let is_member = shard.check_membership(actor_did).await?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({"actorDid": actor_did, "isMember": is_member}).to_string(),
    ))
}

async fn handle_update_config(
    state: &AppState,
    shard_key: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let body = read_body(req).await?;
    let patch: ConfigPatch = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => return Ok(bad_request_response(&format!("invalid config patch: {}", e))),
    };

    let config = state.shards.get_or_create(shard_key).update_config(patch).await?;
    info!(shard = %shard_key, "Community config updated");
    Ok(json_response(
        StatusCode::OK,
        serde_json::to_string(&config)?,
    ))
}

async fn handle_add_member(
    state: &AppState,
    shard_key: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let body = read_body(req).await?;
    let request: AddMemberRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return Ok(bad_request_response(&format!("invalid membership: {}", e))),
    };

    state
        .shards
        .get_or_create(shard_key)
        .add_member(
            &request.actor_did,
            request.role,
            request.joined_at.unwrap_or_else(Utc::now),
            request.active,
        )
        .await?;
    info!(shard = %shard_key, actor = %request.actor_did, "Membership upserted");
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({"ok": true}).to_string(),
    ))
}

async fn handle_moderation(
    state: &AppState,
    shard_key: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let body = read_body(req).await?;
    let action: ModerationAction = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(e) => {
            return Ok(bad_request_response(&format!(
                "invalid moderation action: {}",
                e
            )))
        }
    };

    state
        .shards
        .get_or_create(shard_key)
        .apply_moderation(action)
        .await?;
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({"ok": true}).to_string(),
    ))
}

async fn handle_add_child(
    state: &AppState,
    shard_key: &str,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, AtrariumError> {
    let body = read_body(req).await?;
    let request: AddChildRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return Ok(bad_request_response(&format!("invalid child link: {}", e))),
    };
    if !is_valid_shard_key(&request.child_key) {
        return Ok(bad_request_response(
            "childKey must be 8 lowercase hex characters",
        ));
    }

    let shard = state.shards.get_or_create(shard_key);
    shard.add_child(&request.child_key).await?;
    let children = shard.get_children().await?;
    info!(shard = %shard_key, child = %request.child_key, "Child community linked");
    Ok(json_response(
        StatusCode::OK,
        serde_json::json!({"ok": true, "children": children}).to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use http_body_util::BodyExt;

    use crate::config::Args;
    use crate::router::BatchRouter;
    use crate::shard::ShardRegistry;

    fn app_state() -> AppState {
        let args = Args::parse_from(["atrarium"]);
        let shards = Arc::new(ShardRegistry::new());
        let router = Arc::new(BatchRouter::new(Arc::clone(&shards)));
        AppState::new(args, None, shards, None, router)
    }

    async fn body_json(response: Response<Full<Bytes>>) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_membership_check_reports_is_member() {
        let state = app_state();
        state
            .shards
            .get_or_create("deadbeef")
            .add_member("did:plc:alice", MemberRole::Member, Utc::now(), true)
            .await
            .unwrap();

        let response = handle_check_membership(&state, "deadbeef", "did:plc:alice")
            .await
            .unwrap();
        let json = body_json(response).await;
        assert_eq!(json["actorDid"], "did:plc:alice");
        assert_eq!(json["isMember"], true);

        let response = handle_check_membership(&state, "deadbeef", "did:plc:bob")
            .await
            .unwrap();
        assert_eq!(body_json(response).await["isMember"], false);
    }

    #[tokio::test]
    async fn test_membership_check_on_unknown_community_is_404() {
        let state = app_state();
        let response = handle_check_membership(&state, "deadbeef", "did:plc:alice")
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
