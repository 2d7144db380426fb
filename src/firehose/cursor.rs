//! Persisted firehose resume cursor
//!
//! The cursor is the timestamp (microseconds) of the last event handed to
//! the connector. It is advanced on every inbound event so a crash resumes
//! at-or-before that point: at-least-once, never at-most-once. Duplicates
//! on replay are tolerated downstream (idempotent indexing).
//!
//! Storage is a single small file written via tmp + rename so a crash
//! mid-write never corrupts the previous cursor.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::types::Result;

/// File-backed resume cursor with an in-memory fast path
pub struct CursorStore {
    path: PathBuf,
    current: AtomicU64,
}

impl CursorStore {
    /// Open the cursor store, reading any previously persisted position.
    ///
    /// A missing or unreadable file starts the cursor at zero (subscribe
    /// from live tail - the jetstream treats cursor=0 as "now").
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(s) => match s.trim().parse::<u64>() {
                Ok(v) => {
                    debug!(cursor = v, path = %path.display(), "Loaded firehose cursor");
                    v
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Cursor file unparseable, starting fresh");
                    0
                }
            },
            Err(_) => 0,
        };

        Ok(Self {
            path,
            current: AtomicU64::new(current),
        })
    }

    /// Current cursor position, or `None` if nothing was ever persisted
    pub fn position(&self) -> Option<u64> {
        match self.current.load(Ordering::Acquire) {
            0 => None,
            v => Some(v),
        }
    }

    /// Advance the cursor and persist it. Positions only move forward; a
    /// replayed older event leaves the cursor untouched.
    pub async fn advance(&self, time_us: u64) -> Result<()> {
        let prev = self.current.fetch_max(time_us, Ordering::AcqRel);
        if time_us <= prev {
            return Ok(());
        }

        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, time_us.to_string()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}
