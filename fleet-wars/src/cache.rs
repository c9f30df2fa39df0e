use serde::{Deserialize, Serialize};
use serde_json::Value;
use shipyard::types::parse_instance_key;
use std::collections::BTreeMap;
use std::sync::Arc;

// Client-side memory of what was committed and with which nonce, keyed by instance key.
// Updates are copy-on-write: a handle taken with `entries()` never changes underneath its
// holder, and every write produces a new map.

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommitCacheEntry {
    pub key: String,
    pub payload: Value,
    pub nonce: String,
}

#[derive(Clone, Debug, Default)]
pub struct CommitCache {
    entries: Arc<BTreeMap<String, CommitCacheEntry>>,
}

impl CommitCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&CommitCacheEntry> {
        self.entries.get(key)
    }

    /// Stores `entry` under its own key, returning whatever it replaced.
    pub fn insert(&mut self, entry: CommitCacheEntry) -> Option<CommitCacheEntry> {
        Arc::make_mut(&mut self.entries).insert(entry.key.clone(), entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<CommitCacheEntry> {
        if !self.entries.contains_key(key) {
            return None;
        }
        Arc::make_mut(&mut self.entries).remove(key)
    }

    /// Drops entries for instances of turns before `turn`; those windows are closed for good.
    pub fn prune_before(&mut self, turn: u32) -> usize {
        let stale: Vec<String> = self
            .entries
            .keys()
            .filter(|key| matches!(parse_instance_key(key), Some((_, t)) if t < turn))
            .cloned()
            .collect();
        if stale.is_empty() {
            return 0;
        }
        let entries = Arc::make_mut(&mut self.entries);
        for key in stale.iter() {
            entries.remove(key);
        }
        stale.len()
    }

    pub fn entries(&self) -> Arc<BTreeMap<String, CommitCacheEntry>> {
        Arc::clone(&self.entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(key: &str) -> CommitCacheEntry {
        CommitCacheEntry {
            key: key.to_string(),
            payload: json!({"ships": []}),
            nonce: "0f".repeat(16),
        }
    }

    #[test]
    fn writes_do_not_touch_earlier_handles() {
        let mut cache = CommitCache::new();
        cache.insert(entry("BUILD_1"));
        let before = cache.entries();
        cache.insert(entry("BUILD_2"));
        cache.remove("BUILD_1");
        assert_eq!(before.len(), 1);
        assert!(before.contains_key("BUILD_1"));
        assert_eq!(cache.len(), 1);
        assert!(cache.get("BUILD_2").is_some());
    }

    #[test]
    fn insert_replaces_same_key() {
        let mut cache = CommitCache::new();
        assert!(cache.insert(entry("SPECIES_1")).is_none());
        let mut other = entry("SPECIES_1");
        other.nonce = "aa".repeat(16);
        let old = cache.insert(other).unwrap();
        assert_eq!(old.nonce, "0f".repeat(16));
        assert_eq!(cache.get("SPECIES_1").unwrap().nonce, "aa".repeat(16));
    }

    #[test]
    fn missing_removal_is_a_no_op() {
        let mut cache = CommitCache::new();
        cache.insert(entry("BUILD_1"));
        let handle = cache.entries();
        assert!(cache.remove("BUILD_9").is_none());
        assert!(Arc::ptr_eq(&handle, &cache.entries()));
    }

    #[test]
    fn prunes_closed_turns() {
        let mut cache = CommitCache::new();
        for key in ["SPECIES_1", "BUILD_1", "BUILD_2", "CHARGE_2", "scratch"] {
            cache.insert(entry(key));
        }
        assert_eq!(cache.prune_before(2), 2);
        let keys: Vec<String> = cache.entries().keys().cloned().collect();
        assert_eq!(keys, vec!["BUILD_2", "CHARGE_2", "scratch"]);
        assert_eq!(cache.prune_before(2), 0);
    }
}
