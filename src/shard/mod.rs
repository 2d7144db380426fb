//! Community shards
//!
//! One shard is the exclusive owner of one community's configuration,
//! membership set, post index, moderation log and hierarchy links. Each
//! shard runs as a single serialized command loop, so no two operations on
//! the same community ever interleave; different shards run fully
//! concurrently.

pub mod actor;
pub mod model;
pub mod registry;
pub mod state;

pub use actor::{ShardHandle, ShardStats};
pub use model::{
    CommunityConfig, ConfigPatch, FeedMix, IndexOutcome, MemberRole, Membership, ModerationAction,
    ModerationKind, ModerationStatus, ModerationTarget, PostIndexEntry, Stage,
};
pub use registry::{is_valid_shard_key, ShardRegistry};
pub use state::{CommunityState, IndexCounters};
