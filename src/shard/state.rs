//! Per-community state
//!
//! Pure state container for one community. All mutation goes through the
//! owning actor's command loop, so none of these methods need interior
//! locking. Admission control (membership + blocklist) is evaluated here,
//! inside the shard's own state, which is what keeps it race-free against
//! concurrent membership changes.

use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use super::model::{
    CommunityConfig, ConfigPatch, IndexOutcome, MemberRole, Membership, ModerationAction,
    ModerationKind, ModerationStatus, ModerationTarget, PostIndexEntry,
};
use crate::firehose::PostEvent;

/// Admission and indexing counters, reported in community stats.
/// Rejections are counted, never alerted.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexCounters {
    pub indexed: u64,
    pub duplicates: u64,
    pub rejected_non_member: u64,
    pub rejected_blocked: u64,
    pub rejected_archived: u64,
}

/// Exclusive-owner state for one community
pub struct CommunityState {
    shard_key: String,
    config: CommunityConfig,
    /// Membership rows keyed by actor DID
    members: HashMap<String, Membership>,
    /// Post index keyed by URI, deduplicated
    posts: HashMap<String, PostIndexEntry>,
    /// Chronological index: (createdAt, uri), newest last
    timeline: Vec<(DateTime<Utc>, String)>,
    /// Append-only moderation log
    moderation_log: Vec<ModerationAction>,
    /// Cached set of child community shard keys
    children: BTreeSet<String>,
    counters: IndexCounters,
}

impl CommunityState {
    pub fn new(shard_key: &str) -> Self {
        Self {
            shard_key: shard_key.to_string(),
            config: CommunityConfig::new(shard_key),
            members: HashMap::new(),
            posts: HashMap::new(),
            timeline: Vec::new(),
            moderation_log: Vec::new(),
            children: BTreeSet::new(),
            counters: IndexCounters::default(),
        }
    }

    pub fn shard_key(&self) -> &str {
        &self.shard_key
    }

    pub fn config(&self) -> &CommunityConfig {
        &self.config
    }

    /// Full or partial config overwrite. Always refreshes `updatedAt`.
    /// Value-level validation happened before the call reached the shard.
    pub fn update_config(&mut self, patch: ConfigPatch) -> &CommunityConfig {
        if let Some(name) = patch.name {
            self.config.name = name;
        }
        if let Some(description) = patch.description {
            self.config.description = description;
        }
        if let Some(stage) = patch.stage {
            self.config.stage = stage;
        }
        if let Some(moderators) = patch.moderators {
            self.config.moderators = moderators;
        }
        if let Some(blocklist) = patch.blocklist {
            self.config.blocklist = blocklist;
        }
        if let Some(feed_mix) = patch.feed_mix {
            self.config.feed_mix = feed_mix;
        }
        if let Some(parent) = patch.parent_community {
            self.config.parent_community = parent;
        }
        if let Some(archived) = patch.archived {
            self.config.archived = archived;
        }
        self.config.updated_at = Utc::now();
        &self.config
    }

    /// Idempotent membership upsert keyed by actor DID
    pub fn add_member(
        &mut self,
        actor_did: &str,
        role: MemberRole,
        joined_at: DateTime<Utc>,
        active: bool,
    ) {
        self.members.insert(
            actor_did.to_string(),
            Membership {
                role,
                joined_at,
                active,
            },
        );
    }

    /// True iff a membership row exists for the actor with active=true
    pub fn check_membership(&self, actor_did: &str) -> bool {
        self.members.get(actor_did).is_some_and(|m| m.active)
    }

    pub fn member(&self, actor_did: &str) -> Option<&Membership> {
        self.members.get(actor_did)
    }

    /// Count of active members (stage eligibility is computed from this)
    pub fn active_member_count(&self) -> usize {
        self.members.values().filter(|m| m.active).count()
    }

    /// Index one post. The author must be an active member and not
    /// blocklisted; a tag in the text alone admits nothing. Insertion is
    /// idempotent by URI: re-delivery neither duplicates the entry nor
    /// resets its moderation status.
    pub fn index_post(&mut self, post: &PostEvent) -> IndexOutcome {
        if self.config.archived {
            self.counters.rejected_archived += 1;
            return IndexOutcome::RejectedArchived;
        }
        if self.config.blocklist.contains(&post.author_did) {
            self.counters.rejected_blocked += 1;
            debug!(shard = %self.shard_key, author = %post.author_did, "Post rejected: author blocked");
            return IndexOutcome::RejectedBlocked;
        }
        if !self.check_membership(&post.author_did) {
            self.counters.rejected_non_member += 1;
            debug!(shard = %self.shard_key, author = %post.author_did, "Post rejected: not an active member");
            return IndexOutcome::RejectedNonMember;
        }
        if self.posts.contains_key(&post.uri) {
            self.counters.duplicates += 1;
            return IndexOutcome::Duplicate;
        }

        self.posts.insert(
            post.uri.clone(),
            PostIndexEntry {
                uri: post.uri.clone(),
                author_did: post.author_did.clone(),
                created_at: post.created_at,
                has_media: post.has_media,
                langs: post.langs.clone(),
                moderation_status: ModerationStatus::Approved,
            },
        );

        // Keep the timeline sorted oldest-first; arrivals are usually in
        // order so this is almost always a push
        let slot = (post.created_at, post.uri.clone());
        match self.timeline.binary_search(&slot) {
            Ok(_) => {}
            Err(pos) => self.timeline.insert(pos, slot),
        }

        self.counters.indexed += 1;
        IndexOutcome::Indexed
    }

    /// Append a moderation action and apply its effect.
    ///
    /// hide/unhide on an unknown URI still appends the record for audit,
    /// with a warning. block/unblock maintain the blocklist; a blocked
    /// user's already-indexed posts stay, only future indexing stops.
    pub fn apply_moderation(&mut self, action: ModerationAction) {
        match (&action.action, &action.target) {
            (ModerationKind::HidePost, ModerationTarget::Post { uri, .. }) => {
                match self.posts.get_mut(uri) {
                    Some(entry) => entry.moderation_status = ModerationStatus::Hidden,
                    None => {
                        warn!(shard = %self.shard_key, %uri, "hide_post target not indexed here, recording anyway")
                    }
                }
            }
            (ModerationKind::UnhidePost, ModerationTarget::Post { uri, .. }) => {
                match self.posts.get_mut(uri) {
                    Some(entry) => entry.moderation_status = ModerationStatus::Approved,
                    None => {
                        warn!(shard = %self.shard_key, %uri, "unhide_post target not indexed here, recording anyway")
                    }
                }
            }
            (ModerationKind::BlockUser, ModerationTarget::User { did }) => {
                self.config.blocklist.insert(did.clone());
            }
            (ModerationKind::UnblockUser, ModerationTarget::User { did }) => {
                self.config.blocklist.remove(did);
            }
            (kind, target) => {
                // Mismatched verb/target, e.g. hide_post on a user. The
                // record still lands in the log for audit.
                warn!(shard = %self.shard_key, ?kind, ?target, "Moderation action/target mismatch");
            }
        }
        self.moderation_log.push(action);
    }

    pub fn moderation_log(&self) -> &[ModerationAction] {
        &self.moderation_log
    }

    /// Idempotent child-cache insert
    pub fn add_child(&mut self, child_key: &str) {
        self.children.insert(child_key.to_string());
    }

    pub fn children(&self) -> Vec<String> {
        self.children.iter().cloned().collect()
    }

    pub fn parent(&self) -> Option<&str> {
        self.config.parent_community.as_deref()
    }

    pub fn counters(&self) -> IndexCounters {
        self.counters
    }

    pub fn post_count(&self) -> usize {
        self.posts.len()
    }

    /// Approved posts newer-to-older, starting strictly after the given
    /// resume position (exclusive), up to `limit` entries.
    ///
    /// The position is the (createdAt, uri) pair of the last entry a
    /// previous page returned; ties on createdAt are broken by URI so
    /// paging never skips or repeats entries.
    pub fn approved_posts(
        &self,
        after: Option<&(DateTime<Utc>, String)>,
        limit: usize,
    ) -> Vec<PostIndexEntry> {
        // Upper bound in the oldest-first timeline: everything strictly
        // before the resume position, scanned backwards (newest first)
        let end = match after {
            Some(pos) => match self.timeline.binary_search_by(|slot| slot.cmp(pos)) {
                Ok(i) => i,
                Err(i) => i,
            },
            None => self.timeline.len(),
        };

        let mut out = Vec::with_capacity(limit.min(end));
        for (_, uri) in self.timeline[..end].iter().rev() {
            if out.len() >= limit {
                break;
            }
            if let Some(entry) = self.posts.get(uri) {
                if entry.moderation_status == ModerationStatus::Approved {
                    out.push(entry.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn post(uri_n: usize, author: &str, at_secs: i64) -> PostEvent {
        PostEvent {
            uri: format!("at://{author}/app.bsky.feed.post/{uri_n}"),
            cid: None,
            author_did: author.to_string(),
            text: "#atrarium_deadbeef".to_string(),
            created_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
            langs: vec!["en".to_string()],
            has_media: false,
            time_us: at_secs as u64 * 1_000_000,
        }
    }

    fn member_state() -> CommunityState {
        let mut state = CommunityState::new("deadbeef");
        state.add_member("did:plc:alice", MemberRole::Owner, Utc::now(), true);
        state
    }

    fn hide(uri: &str) -> ModerationAction {
        ModerationAction {
            action: ModerationKind::HidePost,
            target: ModerationTarget::Post {
                uri: uri.to_string(),
                cid: None,
            },
            reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_index_post_is_idempotent() {
        let mut state = member_state();
        let p = post(1, "did:plc:alice", 100);

        assert_eq!(state.index_post(&p), IndexOutcome::Indexed);
        assert_eq!(state.index_post(&p), IndexOutcome::Duplicate);
        assert_eq!(state.post_count(), 1);
        assert_eq!(state.counters().indexed, 1);
        assert_eq!(state.counters().duplicates, 1);
    }

    #[test]
    fn test_redelivery_does_not_reset_moderation_status() {
        let mut state = member_state();
        let p = post(1, "did:plc:alice", 100);
        state.index_post(&p);
        state.apply_moderation(hide(&p.uri));

        // At-least-once upstream delivery replays the same URI
        assert_eq!(state.index_post(&p), IndexOutcome::Duplicate);
        assert!(state.approved_posts(None, 10).is_empty());
    }

    #[test]
    fn test_non_member_posts_are_rejected() {
        let mut state = member_state();
        let p = post(1, "did:plc:stranger", 100);
        assert_eq!(state.index_post(&p), IndexOutcome::RejectedNonMember);
        assert_eq!(state.post_count(), 0);
        assert_eq!(state.counters().rejected_non_member, 1);
    }

    #[test]
    fn test_inactive_member_posts_are_rejected() {
        let mut state = member_state();
        state.add_member("did:plc:bob", MemberRole::Member, Utc::now(), false);
        let p = post(1, "did:plc:bob", 100);
        assert_eq!(state.index_post(&p), IndexOutcome::RejectedNonMember);
    }

    #[test]
    fn test_blocked_member_posts_are_rejected() {
        let mut state = member_state();
        state.apply_moderation(ModerationAction {
            action: ModerationKind::BlockUser,
            target: ModerationTarget::User {
                did: "did:plc:alice".to_string(),
            },
            reason: Some("spam".to_string()),
            created_at: Utc::now(),
        });

        let p = post(1, "did:plc:alice", 100);
        assert_eq!(state.index_post(&p), IndexOutcome::RejectedBlocked);

        // Unblock restores indexing
        state.apply_moderation(ModerationAction {
            action: ModerationKind::UnblockUser,
            target: ModerationTarget::User {
                did: "did:plc:alice".to_string(),
            },
            reason: None,
            created_at: Utc::now(),
        });
        assert_eq!(state.index_post(&p), IndexOutcome::Indexed);
        assert_eq!(state.moderation_log().len(), 2);
    }

    #[test]
    fn test_archived_community_drops_new_posts() {
        let mut state = member_state();
        state.update_config(ConfigPatch {
            archived: Some(true),
            ..ConfigPatch::default()
        });
        let p = post(1, "did:plc:alice", 100);
        assert_eq!(state.index_post(&p), IndexOutcome::RejectedArchived);
    }

    #[test]
    fn test_hide_then_unhide_restores_chronological_position() {
        let mut state = member_state();
        for (n, secs) in [(1, 100), (2, 200), (3, 300)] {
            state.index_post(&post(n, "did:plc:alice", secs));
        }
        let target = "at://did:plc:alice/app.bsky.feed.post/2";

        state.apply_moderation(hide(target));
        let visible: Vec<String> = state
            .approved_posts(None, 10)
            .into_iter()
            .map(|e| e.uri)
            .collect();
        assert_eq!(visible.len(), 2);
        assert!(!visible.contains(&target.to_string()));

        state.apply_moderation(ModerationAction {
            action: ModerationKind::UnhidePost,
            target: ModerationTarget::Post {
                uri: target.to_string(),
                cid: None,
            },
            reason: None,
            created_at: Utc::now(),
        });
        let visible: Vec<String> = state
            .approved_posts(None, 10)
            .into_iter()
            .map(|e| e.uri)
            .collect();
        // Back in its original slot: newest first means 3, 2, 1
        assert_eq!(
            visible,
            vec![
                "at://did:plc:alice/app.bsky.feed.post/3",
                "at://did:plc:alice/app.bsky.feed.post/2",
                "at://did:plc:alice/app.bsky.feed.post/1",
            ]
        );
    }

    #[test]
    fn test_hide_unknown_uri_still_appends_audit_record() {
        let mut state = member_state();
        state.apply_moderation(hide("at://nowhere/app.bsky.feed.post/404"));
        assert_eq!(state.moderation_log().len(), 1);
    }

    #[test]
    fn test_approved_posts_pages_without_skips_or_repeats() {
        let mut state = member_state();
        for n in 0..10 {
            state.index_post(&post(n, "did:plc:alice", 100 + n as i64));
        }

        let first = state.approved_posts(None, 4);
        assert_eq!(first.len(), 4);
        let resume = (
            first.last().unwrap().created_at,
            first.last().unwrap().uri.clone(),
        );
        let second = state.approved_posts(Some(&resume), 4);
        assert_eq!(second.len(), 4);

        let mut seen: Vec<String> = first.into_iter().chain(second).map(|e| e.uri).collect();
        let total = seen.len();
        seen.dedup();
        assert_eq!(seen.len(), total);
    }

    #[test]
    fn test_update_config_refreshes_updated_at_and_merges() {
        let mut state = CommunityState::new("deadbeef");
        let before = state.config().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(5));

        state.update_config(ConfigPatch {
            name: Some("Rust Gardeners".to_string()),
            description: Some(Some("growing things".to_string())),
            ..ConfigPatch::default()
        });
        let config = state.config();
        assert_eq!(config.name, "Rust Gardeners");
        assert_eq!(config.description.as_deref(), Some("growing things"));
        assert_eq!(config.hashtag, "#atrarium_deadbeef");
        assert!(config.updated_at > before);
    }

    #[test]
    fn test_add_child_is_idempotent() {
        let mut state = CommunityState::new("deadbeef");
        state.add_child("aaaa0001");
        state.add_child("aaaa0001");
        state.add_child("aaaa0002");
        assert_eq!(state.children(), vec!["aaaa0001", "aaaa0002"]);
    }

    #[test]
    fn test_active_member_count_ignores_inactive() {
        let mut state = CommunityState::new("deadbeef");
        state.add_member("did:plc:a", MemberRole::Owner, Utc::now(), true);
        state.add_member("did:plc:b", MemberRole::Member, Utc::now(), false);
        assert_eq!(state.active_member_count(), 1);
        assert!(state.check_membership("did:plc:a"));
        assert!(!state.check_membership("did:plc:b"));
    }
}
