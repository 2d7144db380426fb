//! Global candidate stream
//!
//! Graduated communities blend a slice of network-wide posts into their
//! feed. Where those candidates come from is a deployment concern behind
//! this trait; the default deployment carries none and serves an empty
//! stream, which the mixer treats as a short page, not an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::skeleton::CandidatePost;
use crate::types::Result;

/// Source of network-wide feed candidates, newest-first
#[async_trait]
pub trait GlobalFeedSource: Send + Sync {
    /// Up to `limit` candidates strictly after `after` in reverse
    /// chronological order
    async fn approved_posts(
        &self,
        after: Option<(DateTime<Utc>, String)>,
        limit: usize,
    ) -> Result<Vec<CandidatePost>>;
}

/// The empty global stream
pub struct NoGlobalFeed;

#[async_trait]
impl GlobalFeedSource for NoGlobalFeed {
    async fn approved_posts(
        &self,
        _after: Option<(DateTime<Utc>, String)>,
        _limit: usize,
    ) -> Result<Vec<CandidatePost>> {
        Ok(Vec::new())
    }
}
