//! Community tag extraction
//!
//! A community tag is the literal `#atrarium_` followed by exactly 8
//! lowercase hex characters; the hex suffix is the destination shard key.
//! That convention is what lets the router derive the destination without
//! any lookup table.

use crate::firehose::COMMUNITY_TAG_PREFIX;
use crate::shard::registry::SHARD_KEY_LEN;

/// Extract every shard key named by a community tag in the text, in order
/// of appearance, deduplicated.
///
/// A candidate only counts when exactly 8 hex chars follow the prefix and
/// the character after them (if any) does not extend the tag - so
/// `#atrarium_deadbeefX` and `#atrarium_deadbe` both match nothing.
pub fn extract_shard_keys(text: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = text;

    while let Some(at) = rest.find(COMMUNITY_TAG_PREFIX) {
        let candidate = &rest[at + COMMUNITY_TAG_PREFIX.len()..];
        let hex_len = candidate
            .bytes()
            .take_while(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(b))
            .count();

        if hex_len == SHARD_KEY_LEN {
            let key = &candidate[..SHARD_KEY_LEN];
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }

        rest = &rest[at + COMMUNITY_TAG_PREFIX.len()..];
    }

    keys
}
