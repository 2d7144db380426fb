//! Shard actor: serialized command loop per community
//!
//! Each community's state lives inside exactly one spawned task that
//! processes commands in arrival order. The handle side is cheap to clone;
//! every operation is an mpsc send plus a oneshot reply. A closed channel
//! surfaces as `AtrariumError::Shard` - the caller (router fan-out, feed
//! service, admin routes) decides what to do with an unreachable shard.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::model::{
    CommunityConfig, ConfigPatch, IndexOutcome, MemberRole, ModerationAction, PostIndexEntry,
};
use super::state::{CommunityState, IndexCounters};
use crate::firehose::PostEvent;
use crate::types::{AtrariumError, Result};

/// Commands the actor loop understands. Every variant carries its reply
/// channel; a dropped reply just means the caller stopped waiting.
enum Command {
    UpdateConfig {
        patch: ConfigPatch,
        reply: oneshot::Sender<CommunityConfig>,
    },
    GetConfig {
        reply: oneshot::Sender<CommunityConfig>,
    },
    AddMember {
        actor_did: String,
        role: MemberRole,
        joined_at: DateTime<Utc>,
        active: bool,
        reply: oneshot::Sender<()>,
    },
    CheckMembership {
        actor_did: String,
        reply: oneshot::Sender<bool>,
    },
    IndexPost {
        post: PostEvent,
        reply: oneshot::Sender<IndexOutcome>,
    },
    ApplyModeration {
        action: ModerationAction,
        reply: oneshot::Sender<()>,
    },
    AddChild {
        child_key: String,
        reply: oneshot::Sender<()>,
    },
    GetChildren {
        reply: oneshot::Sender<Vec<String>>,
    },
    GetParent {
        reply: oneshot::Sender<Option<String>>,
    },
    ApprovedPosts {
        after: Option<(DateTime<Utc>, String)>,
        limit: usize,
        reply: oneshot::Sender<Vec<PostIndexEntry>>,
    },
    Stats {
        reply: oneshot::Sender<ShardStats>,
    },
}

/// Snapshot returned by the stats command
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardStats {
    pub shard_key: String,
    pub config: CommunityConfig,
    pub active_members: usize,
    pub indexed_posts: usize,
    pub moderation_actions: usize,
    /// Whether the active-member count qualifies for the next stage
    pub next_stage_eligible: bool,
    pub counters: IndexCounters,
}

/// Cloneable handle to one community's shard actor
#[derive(Clone)]
pub struct ShardHandle {
    shard_key: String,
    tx: mpsc::Sender<Command>,
}

impl ShardHandle {
    /// Spawn the actor for a community. Called by the registry on first
    /// write addressed to the shard key.
    pub fn spawn(shard_key: &str) -> Self {
        let (tx, rx) = mpsc::channel(256);
        let state = CommunityState::new(shard_key);

        info!(shard = %shard_key, "Community shard created");
        tokio::spawn(shard_loop(state, rx));

        Self {
            shard_key: shard_key.to_string(),
            tx,
        }
    }

    pub fn shard_key(&self) -> &str {
        &self.shard_key
    }

    /// Handle whose command loop is already gone; every call fails with
    /// `AtrariumError::Shard`. Used to exercise fan-out failure isolation.
    #[cfg(test)]
    pub(crate) fn dead(shard_key: &str) -> Self {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        Self {
            shard_key: shard_key.to_string(),
            tx,
        }
    }

    pub async fn update_config(&self, patch: ConfigPatch) -> Result<CommunityConfig> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::UpdateConfig { patch, reply }).await?;
        self.recv(rx).await
    }

    pub async fn get_config(&self) -> Result<CommunityConfig> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetConfig { reply }).await?;
        self.recv(rx).await
    }

    pub async fn add_member(
        &self,
        actor_did: &str,
        role: MemberRole,
        joined_at: DateTime<Utc>,
        active: bool,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddMember {
            actor_did: actor_did.to_string(),
            role,
            joined_at,
            active,
            reply,
        })
        .await?;
        self.recv(rx).await
    }

    pub async fn check_membership(&self, actor_did: &str) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::CheckMembership {
            actor_did: actor_did.to_string(),
            reply,
        })
        .await?;
        self.recv(rx).await
    }

    pub async fn index_post(&self, post: PostEvent) -> Result<IndexOutcome> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::IndexPost { post, reply }).await?;
        self.recv(rx).await
    }

    pub async fn apply_moderation(&self, action: ModerationAction) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ApplyModeration { action, reply }).await?;
        self.recv(rx).await
    }

    pub async fn add_child(&self, child_key: &str) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::AddChild {
            child_key: child_key.to_string(),
            reply,
        })
        .await?;
        self.recv(rx).await
    }

    pub async fn get_children(&self) -> Result<Vec<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetChildren { reply }).await?;
        self.recv(rx).await
    }

    pub async fn get_parent(&self) -> Result<Option<String>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::GetParent { reply }).await?;
        self.recv(rx).await
    }

    /// Approved posts newest-first, resuming strictly after `after`
    pub async fn approved_posts(
        &self,
        after: Option<(DateTime<Utc>, String)>,
        limit: usize,
    ) -> Result<Vec<PostIndexEntry>> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::ApprovedPosts {
            after,
            limit,
            reply,
        })
        .await?;
        self.recv(rx).await
    }

    pub async fn stats(&self) -> Result<ShardStats> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Stats { reply }).await?;
        self.recv(rx).await
    }

    async fn send(&self, cmd: Command) -> Result<()> {
        self.tx.send(cmd).await.map_err(|_| {
            AtrariumError::Shard(format!("shard {} command loop is gone", self.shard_key))
        })
    }

    async fn recv<R>(&self, rx: oneshot::Receiver<R>) -> Result<R> {
        rx.await.map_err(|_| {
            AtrariumError::Shard(format!("shard {} dropped a reply", self.shard_key))
        })
    }
}

/// The actor loop: commands execute strictly in arrival order
async fn shard_loop(mut state: CommunityState, mut rx: mpsc::Receiver<Command>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            Command::UpdateConfig { patch, reply } => {
                let config = state.update_config(patch).clone();
                let _ = reply.send(config);
            }
            Command::GetConfig { reply } => {
                let _ = reply.send(state.config().clone());
            }
            Command::AddMember {
                actor_did,
                role,
                joined_at,
                active,
                reply,
            } => {
                state.add_member(&actor_did, role, joined_at, active);
                let _ = reply.send(());
            }
            Command::CheckMembership { actor_did, reply } => {
                let _ = reply.send(state.check_membership(&actor_did));
            }
            Command::IndexPost { post, reply } => {
                let outcome = state.index_post(&post);
                let _ = reply.send(outcome);
            }
            Command::ApplyModeration { action, reply } => {
                state.apply_moderation(action);
                let _ = reply.send(());
            }
            Command::AddChild { child_key, reply } => {
                state.add_child(&child_key);
                let _ = reply.send(());
            }
            Command::GetChildren { reply } => {
                let _ = reply.send(state.children());
            }
            Command::GetParent { reply } => {
                let _ = reply.send(state.parent().map(|p| p.to_string()));
            }
            Command::ApprovedPosts {
                after,
                limit,
                reply,
            } => {
                let _ = reply.send(state.approved_posts(after.as_ref(), limit));
            }
            Command::Stats { reply } => {
                let active_members = state.active_member_count();
                let _ = reply.send(ShardStats {
                    shard_key: state.shard_key().to_string(),
                    next_stage_eligible: state
                        .config()
                        .stage
                        .next_stage_eligible(active_members),
                    config: state.config().clone(),
                    active_members,
                    indexed_posts: state.post_count(),
                    moderation_actions: state.moderation_log().len(),
                    counters: state.counters(),
                });
            }
        }
    }
    debug!(shard = %state.shard_key(), "Shard command loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shard::model::{ModerationKind, ModerationTarget};

    fn post(n: usize, author: &str) -> PostEvent {
        PostEvent {
            uri: format!("at://{author}/app.bsky.feed.post/{n}"),
            cid: None,
            author_did: author.to_string(),
            text: "#atrarium_deadbeef".to_string(),
            created_at: Utc::now(),
            langs: vec![],
            has_media: false,
            time_us: n as u64,
        }
    }

    #[tokio::test]
    async fn test_operations_serialize_through_the_actor() {
        let shard = ShardHandle::spawn("deadbeef");
        shard
            .add_member("did:plc:alice", MemberRole::Owner, Utc::now(), true)
            .await
            .unwrap();

        assert!(shard.check_membership("did:plc:alice").await.unwrap());
        assert!(!shard.check_membership("did:plc:bob").await.unwrap());

        let outcome = shard.index_post(post(1, "did:plc:alice")).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Indexed);

        let stats = shard.stats().await.unwrap();
        assert_eq!(stats.active_members, 1);
        assert_eq!(stats.indexed_posts, 1);
        assert!(!stats.next_stage_eligible);
    }

    #[tokio::test]
    async fn test_concurrent_membership_change_and_index_are_ordered() {
        // Both commands funnel through one loop; whichever send lands first
        // wins, and the admission check always sees a consistent state
        let shard = ShardHandle::spawn("deadbeef");
        shard
            .add_member("did:plc:alice", MemberRole::Member, Utc::now(), true)
            .await
            .unwrap();

        let block = shard.apply_moderation(ModerationAction {
            action: ModerationKind::BlockUser,
            target: ModerationTarget::User {
                did: "did:plc:alice".to_string(),
            },
            reason: None,
            created_at: Utc::now(),
        });
        block.await.unwrap();

        let outcome = shard.index_post(post(2, "did:plc:alice")).await.unwrap();
        assert_eq!(outcome, IndexOutcome::RejectedBlocked);
    }

    #[tokio::test]
    async fn test_hierarchy_calls() {
        let shard = ShardHandle::spawn("aaaa0000");
        shard.add_child("bbbb0000").await.unwrap();
        shard.add_child("bbbb0000").await.unwrap();
        assert_eq!(shard.get_children().await.unwrap(), vec!["bbbb0000"]);
        assert_eq!(shard.get_parent().await.unwrap(), None);

        shard
            .update_config(ConfigPatch {
                parent_community: Some(Some("cccc0000".to_string())),
                ..ConfigPatch::default()
            })
            .await
            .unwrap();
        assert_eq!(
            shard.get_parent().await.unwrap(),
            Some("cccc0000".to_string())
        );
    }
}
