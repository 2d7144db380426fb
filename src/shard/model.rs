//! Community domain types
//!
//! These are the shard-owned records. Their JSON shape doubles as the wire
//! format of the administrative API, so everything is serde-derived with
//! camelCase naming.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::firehose::COMMUNITY_TAG_PREFIX;

/// Member count at which a theme community becomes eligible for the
/// community stage
pub const COMMUNITY_STAGE_THRESHOLD: usize = 15;

/// Member count at which a community becomes eligible for graduation
pub const GRADUATED_STAGE_THRESHOLD: usize = 50;

/// Community lifecycle tier
///
/// The stage only affects feed-mix interpretation and moderation
/// inheritance; it never changes the shard's operational behavior. Stage
/// transitions are invoked by the administrative collaborator, the shard
/// only reports eligibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Theme,
    Community,
    Graduated,
}

impl Stage {
    /// Whether the given active-member count makes the next stage
    /// available. Graduated communities have nowhere further to go.
    pub fn next_stage_eligible(&self, active_members: usize) -> bool {
        match self {
            Stage::Theme => active_members >= COMMUNITY_STAGE_THRESHOLD,
            Stage::Community => active_members >= GRADUATED_STAGE_THRESHOLD,
            Stage::Graduated => false,
        }
    }
}

/// Proportional blend of own/parent/global posts composing a served feed.
/// Fractions sum to 1.0; validation happens before the shard is called.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeedMix {
    pub own: f64,
    pub parent: f64,
    pub global: f64,
}

impl Default for FeedMix {
    /// Theme communities start serving only their own posts
    fn default() -> Self {
        Self {
            own: 1.0,
            parent: 0.0,
            global: 0.0,
        }
    }
}

/// Per-community configuration, owned exclusively by the shard
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Routing hashtag; the hex suffix IS the shard key
    pub hashtag: String,
    pub stage: Stage,
    pub moderators: BTreeSet<String>,
    pub blocklist: BTreeSet<String>,
    pub feed_mix: FeedMix,
    /// Shard key of the parent community, if this is a child theme
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_community: Option<String>,
    /// Archived communities keep serving reads but stop indexing new posts
    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunityConfig {
    /// Fresh config for a shard created implicitly on first write
    pub fn new(shard_key: &str) -> Self {
        let now = Utc::now();
        Self {
            name: String::new(),
            description: None,
            hashtag: format!("{}{}", COMMUNITY_TAG_PREFIX, shard_key),
            stage: Stage::Theme,
            moderators: BTreeSet::new(),
            blocklist: BTreeSet::new(),
            feed_mix: FeedMix::default(),
            parent_community: None,
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial config overwrite. Absent fields keep their current value;
/// `updatedAt` is always refreshed by the shard.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigPatch {
    pub name: Option<String>,
    /// Absent keeps the current description, explicit null clears it
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub stage: Option<Stage>,
    pub moderators: Option<BTreeSet<String>>,
    pub blocklist: Option<BTreeSet<String>>,
    pub feed_mix: Option<FeedMix>,
    /// Absent keeps the current parent, explicit null detaches it
    #[serde(default, deserialize_with = "double_option")]
    pub parent_community: Option<Option<String>>,
    pub archived: Option<bool>,
}

/// Deserialize a present-but-possibly-null field into `Some(inner)`, so the
/// patch can tell "not sent" apart from "sent as null"
fn double_option<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
where
    T: serde::Deserialize<'de>,
    D: serde::Deserializer<'de>,
{
    serde::Deserialize::deserialize(de).map(Some)
}

/// Membership role. Exactly one owner exists per shard at any time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Moderator,
    Member,
}

/// One membership row, keyed by (community, actor DID)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
    pub active: bool,
}

/// Moderation visibility of an indexed post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationStatus {
    Approved,
    Hidden,
}

/// One entry in the community's post index, deduplicated by URI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostIndexEntry {
    pub uri: String,
    pub author_did: String,
    pub created_at: DateTime<Utc>,
    pub has_media: bool,
    pub langs: Vec<String>,
    pub moderation_status: ModerationStatus,
}

/// Target of a moderation action: a post or a user, never both
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerationTarget {
    Post { uri: String, cid: Option<String> },
    User { did: String },
}

/// Append-only moderation log record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationAction {
    pub action: ModerationKind,
    pub target: ModerationTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The moderation verbs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationKind {
    HidePost,
    UnhidePost,
    BlockUser,
    UnblockUser,
}

/// What happened to a post handed to `index_post`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    /// New entry created
    Indexed,
    /// URI already present; nothing changed (moderation status preserved)
    Duplicate,
    /// Author has no active membership row
    RejectedNonMember,
    /// Author is on the community blocklist
    RejectedBlocked,
    /// Community is archived; new posts are dropped
    RejectedArchived,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_eligibility_thresholds() {
        assert!(!Stage::Theme.next_stage_eligible(14));
        assert!(Stage::Theme.next_stage_eligible(15));
        assert!(!Stage::Community.next_stage_eligible(49));
        assert!(Stage::Community.next_stage_eligible(50));
        assert!(!Stage::Graduated.next_stage_eligible(1000));
    }

    #[test]
    fn test_new_config_derives_hashtag_from_shard_key() {
        let config = CommunityConfig::new("deadbeef");
        assert_eq!(config.hashtag, "#atrarium_deadbeef");
        assert_eq!(config.stage, Stage::Theme);
        assert_eq!(config.feed_mix, FeedMix::default());
    }

    #[test]
    fn test_moderation_target_is_tagged_union() {
        let post = ModerationTarget::Post {
            uri: "at://x/app.bsky.feed.post/1".to_string(),
            cid: None,
        };
        let json = serde_json::to_value(&post).unwrap();
        assert_eq!(json["type"], "post");

        let user: ModerationTarget =
            serde_json::from_str(r#"{"type":"user","did":"did:plc:a"}"#).unwrap();
        assert_eq!(
            user,
            ModerationTarget::User {
                did: "did:plc:a".to_string()
            }
        );
    }

    #[test]
    fn test_config_patch_distinguishes_absent_from_null() {
        // Absent: keep current description. Null: clear it.
        let absent: ConfigPatch = serde_json::from_str(r#"{"name":"gardening"}"#).unwrap();
        assert!(absent.description.is_none());

        let cleared: ConfigPatch = serde_json::from_str(r#"{"description":null}"#).unwrap();
        assert_eq!(cleared.description, Some(None));
    }
}
