//! Actor-per-key shard registry
//!
//! Maps community shard key -> live actor handle. A shard is created
//! implicitly on the first write addressed to its key and lives for the
//! process lifetime; there is no structural deletion (archival is a config
//! flag on the shard itself).

use dashmap::DashMap;

use super::actor::ShardHandle;

/// Shard keys are the 8-hex-char suffix of the community hashtag
pub const SHARD_KEY_LEN: usize = 8;

/// Whether a string is a well-formed shard key (8 lowercase hex chars)
pub fn is_valid_shard_key(key: &str) -> bool {
    key.len() == SHARD_KEY_LEN
        && key
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

/// Registry of live community shards
pub struct ShardRegistry {
    shards: DashMap<String, ShardHandle>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self {
            shards: DashMap::new(),
        }
    }

    /// Handle for a key, spawning the actor on first use. Write paths
    /// (router fan-out, admin operations) go through here.
    pub fn get_or_create(&self, shard_key: &str) -> ShardHandle {
        self.shards
            .entry(shard_key.to_string())
            .or_insert_with(|| ShardHandle::spawn(shard_key))
            .clone()
    }

    /// Handle for an existing shard only. Read paths (feeds) use this so a
    /// query for a never-written community does not materialize state.
    pub fn get(&self, shard_key: &str) -> Option<ShardHandle> {
        self.shards.get(shard_key).map(|h| h.clone())
    }

    /// Number of live shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// Snapshot of live shard keys, for the status endpoint
    pub fn keys(&self) -> Vec<String> {
        self.shards.iter().map(|e| e.key().clone()).collect()
    }

    /// Pre-seed a handle, bypassing spawn. Test-only.
    #[cfg(test)]
    pub(crate) fn insert(&self, shard_key: &str, handle: ShardHandle) {
        self.shards.insert(shard_key.to_string(), handle);
    }
}

impl Default for ShardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shard_key_validation() {
        assert!(is_valid_shard_key("deadbeef"));
        assert!(is_valid_shard_key("01234567"));
        assert!(!is_valid_shard_key("DEADBEEF")); // uppercase
        assert!(!is_valid_shard_key("deadbee")); // short
        assert!(!is_valid_shard_key("deadbeef0")); // long
        assert!(!is_valid_shard_key("deadbeeg")); // non-hex
    }

    #[tokio::test]
    async fn test_get_or_create_returns_the_same_shard() {
        let registry = ShardRegistry::new();
        let a = registry.get_or_create("deadbeef");
        let b = registry.get_or_create("deadbeef");
        assert_eq!(registry.len(), 1);

        // Both handles reach the same actor state
        a.add_child("aaaa0001").await.unwrap();
        assert_eq!(b.get_children().await.unwrap(), vec!["aaaa0001"]);
    }

    #[tokio::test]
    async fn test_get_does_not_create() {
        let registry = ShardRegistry::new();
        assert!(registry.get("deadbeef").is_none());
        assert!(registry.is_empty());
        registry.get_or_create("deadbeef");
        assert!(registry.get("deadbeef").is_some());
    }
}
