//! Weighted interleave merge
//!
//! One page is assembled from up to three newest-first streams: the
//! community's own approved posts, its parent's own posts, and the global
//! candidate stream. The page size is split across them proportionally to
//! the community's feed mix, with the rounding remainder going to the own
//! stream. A stream allocated zero slots is never queried.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::cursor::{FeedCursor, StreamPos};
use super::global::GlobalFeedSource;
use crate::shard::{PostIndexEntry, ShardRegistry};
use crate::types::Result;

/// One feed candidate: just enough to order and return it
#[derive(Debug, Clone, PartialEq)]
pub struct CandidatePost {
    pub uri: String,
    pub created_at: DateTime<Utc>,
}

impl From<PostIndexEntry> for CandidatePost {
    fn from(entry: PostIndexEntry) -> Self {
        Self {
            uri: entry.uri,
            created_at: entry.created_at,
        }
    }
}

/// One assembled page of the feed skeleton
#[derive(Debug, Clone)]
pub struct FeedPage {
    /// Post URIs, createdAt descending
    pub posts: Vec<String>,
    /// Opaque resume cursor; absent when every stream is exhausted
    pub cursor: Option<String>,
}

/// Which stream a merged candidate came from, for cursor bookkeeping
#[derive(Clone, Copy, PartialEq)]
enum Origin {
    Own,
    Parent,
    Global,
}

/// Stateless read side over the shard registry
pub struct FeedSkeletonService {
    shards: Arc<ShardRegistry>,
    global: Arc<dyn GlobalFeedSource>,
    max_limit: usize,
}

impl FeedSkeletonService {
    pub fn new(
        shards: Arc<ShardRegistry>,
        global: Arc<dyn GlobalFeedSource>,
        max_limit: usize,
    ) -> Self {
        Self {
            shards,
            global,
            max_limit,
        }
    }

    /// Assemble one page for a community's feed. `Ok(None)` means the
    /// community has no shard; reads never materialize one.
    pub async fn get_skeleton(
        &self,
        feed: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Option<FeedPage>> {
        let Some(shard) = self.shards.get(feed) else {
            return Ok(None);
        };

        let limit = limit.clamp(1, self.max_limit);
        let mut cursor = match cursor {
            Some(raw) => FeedCursor::decode(raw, feed)?,
            None => FeedCursor::new(feed),
        };

        let config = shard.get_config().await?;
        let mix = config.feed_mix;

        // Proportional split: parent and global get their floored share,
        // the remainder (all of it, for a theme community) goes to own
        let parent_n = allocate(limit, mix.parent);
        let global_n = allocate(limit, mix.global);
        let own_n = limit.saturating_sub(parent_n + global_n);

        let mut merged: Vec<(Origin, CandidatePost)> = Vec::with_capacity(limit);

        if own_n > 0 {
            let after = cursor.own.as_ref().and_then(StreamPos::as_key);
            for entry in shard.approved_posts(after, own_n).await? {
                merged.push((Origin::Own, entry.into()));
            }
        }

        if parent_n > 0 {
            // Only a configured, live parent contributes; a missing parent
            // shard just leaves the page short
            if let Some(parent_shard) = config
                .parent_community
                .as_deref()
                .and_then(|key| self.shards.get(key))
            {
                let after = cursor.parent.as_ref().and_then(StreamPos::as_key);
                for entry in parent_shard.approved_posts(after, parent_n).await? {
                    merged.push((Origin::Parent, entry.into()));
                }
            } else if config.parent_community.is_some() {
                debug!(%feed, "Parent community has no live shard, skipping its stream");
            }
        }

        if global_n > 0 {
            let after = cursor.global.as_ref().and_then(StreamPos::as_key);
            for candidate in self.global.approved_posts(after, global_n).await? {
                merged.push((Origin::Global, candidate));
            }
        }

        if merged.is_empty() {
            return Ok(Some(FeedPage {
                posts: Vec::new(),
                cursor: None,
            }));
        }

        // createdAt descending, URI descending on ties (matches the order
        // each stream already yields)
        merged.sort_by(|(_, a), (_, b)| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.uri.cmp(&a.uri))
        });

        // Each stream resumes after the oldest item it contributed;
        // untouched streams keep their prior position
        for origin in [Origin::Own, Origin::Parent, Origin::Global] {
            if let Some((_, last)) = merged.iter().rev().find(|(o, _)| *o == origin) {
                let pos = Some(StreamPos::new(last.created_at, &last.uri));
                match origin {
                    Origin::Own => cursor.own = pos,
                    Origin::Parent => cursor.parent = pos,
                    Origin::Global => cursor.global = pos,
                }
            }
        }

        Ok(Some(FeedPage {
            posts: merged.into_iter().map(|(_, c)| c.uri).collect(),
            cursor: Some(cursor.encode()?),
        }))
    }
}

/// Floored share of `limit`, tolerant of binary-fraction noise so that
/// 0.3 of 10 allocates 3, not 2
fn allocate(limit: usize, fraction: f64) -> usize {
    if fraction <= 0.0 {
        return 0;
    }
    ((limit as f64) * fraction + 1e-9).floor() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    use crate::feed::global::NoGlobalFeed;
    use crate::firehose::PostEvent;
    use crate::shard::{
        ConfigPatch, FeedMix, MemberRole, ModerationAction, ModerationKind, ModerationTarget,
        ShardHandle,
    };

    fn at(n: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + n, 0).unwrap()
    }

    fn post(prefix: &str, n: i64) -> PostEvent {
        PostEvent {
            uri: format!("at://did:plc:{prefix}/app.bsky.feed.post/{n}"),
            cid: None,
            author_did: format!("did:plc:{prefix}"),
            text: "#atrarium_deadbeef".to_string(),
            created_at: at(n),
            langs: vec![],
            has_media: false,
            time_us: n as u64,
        }
    }

    /// Seed a shard with `count` approved posts authored by `prefix`
    async fn seed(shard: &ShardHandle, prefix: &str, count: i64) {
        shard
            .add_member(
                &format!("did:plc:{prefix}"),
                MemberRole::Member,
                Utc::now(),
                true,
            )
            .await
            .unwrap();
        for n in 0..count {
            shard.index_post(post(prefix, n)).await.unwrap();
        }
    }

    /// Fixed newest-first candidate list standing in for the network feed
    struct StubGlobal {
        posts: Vec<CandidatePost>,
    }

    impl StubGlobal {
        fn new(prefix: &str, count: i64) -> Self {
            let mut posts: Vec<CandidatePost> = (0..count)
                .map(|n| CandidatePost {
                    uri: format!("at://did:plc:{prefix}/app.bsky.feed.post/{n}"),
                    created_at: at(n),
                })
                .collect();
            posts.reverse();
            Self { posts }
        }
    }

    #[async_trait]
    impl GlobalFeedSource for StubGlobal {
        async fn approved_posts(
            &self,
            after: Option<(DateTime<Utc>, String)>,
            limit: usize,
        ) -> Result<Vec<CandidatePost>> {
            Ok(self
                .posts
                .iter()
                .filter(|p| match &after {
                    Some((t, uri)) => {
                        (p.created_at, p.uri.as_str()) < (*t, uri.as_str())
                    }
                    None => true,
                })
                .take(limit)
                .cloned()
                .collect())
        }
    }

    /// Fails the test if the mixer ever touches the global stream
    struct RefuseGlobal;

    #[async_trait]
    impl GlobalFeedSource for RefuseGlobal {
        async fn approved_posts(
            &self,
            _after: Option<(DateTime<Utc>, String)>,
            _limit: usize,
        ) -> Result<Vec<CandidatePost>> {
            panic!("global stream queried despite a zero fraction");
        }
    }

    #[tokio::test]
    async fn test_unknown_community_is_none() {
        let shards = Arc::new(ShardRegistry::new());
        let service = FeedSkeletonService::new(shards, Arc::new(NoGlobalFeed), 100);
        assert!(service
            .get_skeleton("deadbeef", 10, None)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_theme_community_never_queries_parent_or_global() {
        let shards = Arc::new(ShardRegistry::new());
        seed(&shards.get_or_create("deadbeef"), "alice", 3).await;
        let service = FeedSkeletonService::new(Arc::clone(&shards), Arc::new(RefuseGlobal), 100);

        let page = service
            .get_skeleton("deadbeef", 10, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.posts.len(), 3);
        // Newest first
        assert!(page.posts[0].ends_with("/2"));
        assert!(page.posts[2].ends_with("/0"));
    }

    #[tokio::test]
    async fn test_page_splits_five_three_two() {
        let shards = Arc::new(ShardRegistry::new());
        let own = shards.get_or_create("aaaa0000");
        seed(&own, "own", 20).await;
        seed(&shards.get_or_create("bbbb0000"), "parent", 20).await;
        own.update_config(ConfigPatch {
            parent_community: Some(Some("bbbb0000".to_string())),
            feed_mix: Some(FeedMix {
                own: 0.5,
                parent: 0.3,
                global: 0.2,
            }),
            ..ConfigPatch::default()
        })
        .await
        .unwrap();

        let service = FeedSkeletonService::new(
            Arc::clone(&shards),
            Arc::new(StubGlobal::new("global", 20)),
            100,
        );
        let page = service
            .get_skeleton("aaaa0000", 10, None)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(page.posts.len(), 10);
        let count = |who: &str| {
            page.posts
                .iter()
                .filter(|uri| uri.contains(&format!("did:plc:{who}/")))
                .count()
        };
        assert_eq!(count("own"), 5);
        assert_eq!(count("parent"), 3);
        assert_eq!(count("global"), 2);
    }

    #[tokio::test]
    async fn test_paging_covers_every_post_exactly_once() {
        let shards = Arc::new(ShardRegistry::new());
        seed(&shards.get_or_create("deadbeef"), "alice", 7).await;
        let service = FeedSkeletonService::new(Arc::clone(&shards), Arc::new(NoGlobalFeed), 100);

        let mut seen = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let page = service
                .get_skeleton("deadbeef", 3, cursor.as_deref())
                .await
                .unwrap()
                .unwrap();
            if page.posts.is_empty() {
                break;
            }
            seen.extend(page.posts);
            cursor = page.cursor;
        }

        assert_eq!(seen.len(), 7);
        let mut unique = seen.clone();
        unique.dedup();
        assert_eq!(unique.len(), 7, "no post repeated across pages");
        // Strict newest-first across page boundaries
        for n in 0..7 {
            assert!(seen[n as usize].ends_with(&format!("/{}", 6 - n)));
        }
    }

    #[tokio::test]
    async fn test_cursor_from_another_feed_is_rejected() {
        let shards = Arc::new(ShardRegistry::new());
        seed(&shards.get_or_create("aaaa0000"), "alice", 2).await;
        seed(&shards.get_or_create("bbbb0000"), "alice", 2).await;
        let service = FeedSkeletonService::new(Arc::clone(&shards), Arc::new(NoGlobalFeed), 100);

        let page = service
            .get_skeleton("aaaa0000", 1, None)
            .await
            .unwrap()
            .unwrap();
        let stolen = page.cursor.unwrap();
        assert!(service
            .get_skeleton("bbbb0000", 1, Some(&stolen))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_hidden_post_disappears_and_returns_in_place() {
        let shards = Arc::new(ShardRegistry::new());
        let shard = shards.get_or_create("deadbeef");
        seed(&shard, "alice", 5).await;
        let service = FeedSkeletonService::new(Arc::clone(&shards), Arc::new(NoGlobalFeed), 100);

        let target = post("alice", 2).uri;
        shard
            .apply_moderation(ModerationAction {
                action: ModerationKind::HidePost,
                target: ModerationTarget::Post {
                    uri: target.clone(),
                    cid: None,
                },
                reason: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let page = service
            .get_skeleton("deadbeef", 10, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.posts.len(), 4);
        assert!(!page.posts.contains(&target));

        shard
            .apply_moderation(ModerationAction {
                action: ModerationKind::UnhidePost,
                target: ModerationTarget::Post {
                    uri: target.clone(),
                    cid: None,
                },
                reason: None,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let page = service
            .get_skeleton("deadbeef", 10, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.posts.len(), 5);
        // Back in its original chronological slot
        assert_eq!(page.posts[2], target);
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let shards = Arc::new(ShardRegistry::new());
        seed(&shards.get_or_create("deadbeef"), "alice", 10).await;
        let service = FeedSkeletonService::new(Arc::clone(&shards), Arc::new(NoGlobalFeed), 5);

        let page = service
            .get_skeleton("deadbeef", 50, None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.posts.len(), 5);
    }

    #[test]
    fn test_allocation_survives_binary_fractions() {
        assert_eq!(allocate(10, 0.3), 3);
        assert_eq!(allocate(10, 0.2), 2);
        assert_eq!(allocate(10, 0.0), 0);
        assert_eq!(allocate(7, 1.0), 7);
    }
}
