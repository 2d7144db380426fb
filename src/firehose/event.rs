//! Jetstream wire types and the internal post event
//!
//! The jetstream delivers one JSON object per WebSocket text frame. Only
//! `kind=commit` events carry a record; everything else (identity, account)
//! is ignored by the connector filter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Literal prefix every community tag starts with. The cheap connector-side
/// filter is a substring check against this.
pub const COMMUNITY_TAG_PREFIX: &str = "#atrarium_";

/// One event as delivered by the jetstream
#[derive(Debug, Clone, Deserialize)]
pub struct JetstreamEvent {
    /// Repo (actor) DID - treated as an opaque identity string
    pub did: String,
    /// Event timestamp in microseconds, used as the resume cursor
    pub time_us: u64,
    /// Event kind: "commit", "identity", "account"
    pub kind: String,
    /// Commit payload, present for kind=commit
    #[serde(default)]
    pub commit: Option<CommitInfo>,
}

/// Commit portion of a jetstream event
#[derive(Debug, Clone, Deserialize)]
pub struct CommitInfo {
    /// Operation: "create", "update", "delete"
    pub operation: String,
    /// Record collection, e.g. "app.bsky.feed.post"
    pub collection: String,
    /// Record key within the collection
    pub rkey: String,
    /// CID of the record (absent on delete)
    #[serde(default)]
    pub cid: Option<String>,
    /// Record fields (absent on delete)
    #[serde(default)]
    pub record: Option<PostRecord>,
}

/// The post record fields Atrarium cares about. The full Lexicon shape is
/// an external contract; unknown fields are dropped on deserialization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRecord {
    #[serde(default)]
    pub text: String,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub langs: Vec<String>,
    /// Opaque embed block; presence is all the index records (hasMedia)
    #[serde(default)]
    pub embed: Option<serde_json::Value>,
}

/// A post event after the connector filter, as carried through the queue
/// and handed to shards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEvent {
    /// AT-URI of the post: at://{did}/{collection}/{rkey}
    pub uri: String,
    /// CID of the post record, if present on the commit
    pub cid: Option<String>,
    /// Author DID
    pub author_did: String,
    /// Raw post text (the router re-extracts tags from this)
    pub text: String,
    /// Author-declared creation time; falls back to the firehose timestamp
    pub created_at: DateTime<Utc>,
    /// Post languages
    pub langs: Vec<String>,
    /// Whether the record carried an embed
    pub has_media: bool,
    /// Firehose timestamp in microseconds
    pub time_us: u64,
}

impl JetstreamEvent {
    /// Apply the connector's lightweight filter: forward only create-operation
    /// post events whose text contains the community-tag prefix.
    ///
    /// Returns the internal `PostEvent` when the event passes.
    pub fn into_post_event(self, post_collection: &str) -> Option<PostEvent> {
        if self.kind != "commit" {
            return None;
        }
        let commit = self.commit?;
        if commit.operation != "create" || commit.collection != post_collection {
            return None;
        }
        let record = commit.record?;
        if !record.text.contains(COMMUNITY_TAG_PREFIX) {
            return None;
        }

        let created_at = record.created_at.unwrap_or_else(|| {
            DateTime::from_timestamp_micros(self.time_us as i64).unwrap_or_else(Utc::now)
        });

        Some(PostEvent {
            uri: format!("at://{}/{}/{}", self.did, commit.collection, commit.rkey),
            cid: commit.cid,
            author_did: self.did,
            text: record.text,
            created_at,
            langs: record.langs,
            has_media: record.embed.is_some(),
            time_us: self.time_us,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_event(operation: &str, collection: &str, text: &str) -> JetstreamEvent {
        JetstreamEvent {
            did: "did:plc:alice".to_string(),
            time_us: 1_700_000_000_000_000,
            kind: "commit".to_string(),
            commit: Some(CommitInfo {
                operation: operation.to_string(),
                collection: collection.to_string(),
                rkey: "3kabc".to_string(),
                cid: Some("bafyrei".to_string()),
                record: Some(PostRecord {
                    text: text.to_string(),
                    created_at: None,
                    langs: vec!["en".to_string()],
                    embed: None,
                }),
            }),
        }
    }

    #[test]
    fn test_tagged_create_passes_filter() {
        let ev = commit_event("create", "app.bsky.feed.post", "hi #atrarium_deadbeef");
        let post = ev.into_post_event("app.bsky.feed.post").unwrap();
        assert_eq!(post.uri, "at://did:plc:alice/app.bsky.feed.post/3kabc");
        assert_eq!(post.author_did, "did:plc:alice");
        assert!(!post.has_media);
        // createdAt falls back to the firehose timestamp
        assert_eq!(post.created_at.timestamp_micros(), 1_700_000_000_000_000);
    }

    #[test]
    fn test_untagged_post_is_dropped() {
        let ev = commit_event("create", "app.bsky.feed.post", "no tag here");
        assert!(ev.into_post_event("app.bsky.feed.post").is_none());
    }

    #[test]
    fn test_delete_operation_is_dropped() {
        let ev = commit_event("delete", "app.bsky.feed.post", "#atrarium_deadbeef");
        assert!(ev.into_post_event("app.bsky.feed.post").is_none());
    }

    #[test]
    fn test_non_commit_kind_is_dropped() {
        let ev = JetstreamEvent {
            did: "did:plc:alice".to_string(),
            time_us: 1,
            kind: "identity".to_string(),
            commit: None,
        };
        assert!(ev.into_post_event("app.bsky.feed.post").is_none());
    }

    #[test]
    fn test_jetstream_event_parses_from_wire_json() {
        let raw = r#"{
            "did": "did:plc:bob",
            "time_us": 1700000000000001,
            "kind": "commit",
            "commit": {
                "rev": "22abc",
                "operation": "create",
                "collection": "app.bsky.feed.post",
                "rkey": "3kxyz",
                "record": {
                    "$type": "app.bsky.feed.post",
                    "text": "join us #atrarium_0011aabb",
                    "createdAt": "2024-11-14T12:00:00Z",
                    "langs": ["en", "ja"],
                    "embed": {"$type": "app.bsky.embed.images"}
                },
                "cid": "bafyreib"
            }
        }"#;
        let ev: JetstreamEvent = serde_json::from_str(raw).unwrap();
        let post = ev.into_post_event("app.bsky.feed.post").unwrap();
        assert!(post.has_media);
        assert_eq!(post.langs, vec!["en", "ja"]);
        assert_eq!(post.cid.as_deref(), Some("bafyreib"));
    }
}
