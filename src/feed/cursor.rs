//! Opaque feed paging cursor
//!
//! The cursor records, per source stream, the (createdAt, uri) of the last
//! entry already returned, so the next page resumes strictly after it
//! without re-scanning. It is bound to the feed it was issued from and
//! rejected anywhere else. The wire form is base64(JSON) and clients must
//! treat it as opaque.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AtrariumError, Result};

/// Resume position within one time-ordered stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamPos {
    /// createdAt of the last returned entry, in microseconds
    pub at_us: i64,
    /// URI of the last returned entry (tie-breaker)
    pub uri: String,
}

impl StreamPos {
    pub fn new(at: DateTime<Utc>, uri: &str) -> Self {
        Self {
            at_us: at.timestamp_micros(),
            uri: uri.to_string(),
        }
    }

    /// The (createdAt, uri) pair shard queries resume after
    pub fn as_key(&self) -> Option<(DateTime<Utc>, String)> {
        DateTime::from_timestamp_micros(self.at_us).map(|at| (at, self.uri.clone()))
    }
}

/// Per-stream positions for one feed
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedCursor {
    /// Shard key of the feed this cursor was issued for
    pub feed: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub own: Option<StreamPos>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<StreamPos>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub global: Option<StreamPos>,
}

impl FeedCursor {
    pub fn new(feed: &str) -> Self {
        Self {
            feed: feed.to_string(),
            ..Self::default()
        }
    }

    /// Encode to the opaque wire form
    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Decode a client-supplied cursor, verifying it belongs to `feed`
    pub fn decode(raw: &str, feed: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| AtrariumError::Feed(format!("malformed cursor: {}", e)))?;
        let cursor: FeedCursor = serde_json::from_slice(&bytes)
            .map_err(|e| AtrariumError::Feed(format!("malformed cursor: {}", e)))?;
        if cursor.feed != feed {
            return Err(AtrariumError::Feed(
                "cursor was issued for a different feed".to_string(),
            ));
        }
        Ok(cursor)
    }
}
