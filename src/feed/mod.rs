//! Feed skeleton assembly
//!
//! Stateless read side: given a community, a page size and an opaque
//! cursor, produce the ordered post-URI list a feed consumer pages
//! through. Pages are a weighted interleave of the community's own posts,
//! its parent's posts and a global candidate stream.

pub mod cursor;
pub mod global;
pub mod skeleton;

pub use cursor::{FeedCursor, StreamPos};
pub use global::{GlobalFeedSource, NoGlobalFeed};
pub use skeleton::{CandidatePost, FeedPage, FeedSkeletonService};
