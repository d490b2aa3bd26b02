//! Checkpoint state for resumable batch runs.
//!
//! - `completed` maps a product key to its generated content
//! - `processed_keys` is the set of keys excluded from future batches
//! - After `reconcile`, `processed_keys == keys(completed)`

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Current on-disk schema version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// In-memory checkpoint state.
///
/// Ordered collections keep the serialized form deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    /// Generated replacement content per product key
    #[serde(default)]
    pub completed: BTreeMap<String, String>,
    /// Keys that must not be selected again
    #[serde(default)]
    pub processed_keys: BTreeSet<String>,
}

impl CheckpointState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `content` for `key` and mark it processed. Last write wins.
    pub fn record(&mut self, key: &str, content: String) {
        self.completed.insert(key.to_string(), content);
        self.processed_keys.insert(key.to_string());
    }

    /// Recompute `processed_keys` from `completed`.
    ///
    /// Returns the keys that were marked processed without content, sorted.
    pub fn reconcile(&mut self) -> Vec<String> {
        let stale: Vec<String> = self.stale_keys().map(str::to_string).collect();
        self.processed_keys = self.completed.keys().cloned().collect();
        stale
    }

    /// Keys marked processed that have no completed content.
    pub fn stale_keys(&self) -> impl Iterator<Item = &str> {
        self.processed_keys
            .iter()
            .filter(|key| !self.completed.contains_key(*key))
            .map(String::as_str)
    }

    /// Whether `processed_keys` and `keys(completed)` agree.
    pub fn is_consistent(&self) -> bool {
        self.processed_keys.len() == self.completed.len()
            && self.completed.keys().all(|k| self.processed_keys.contains(k))
    }

    /// Whether content exists for `key`.
    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains_key(key)
    }

    /// Whether `key` is excluded from candidate selection.
    pub fn is_processed(&self, key: &str) -> bool {
        self.processed_keys.contains(key)
    }

    /// Generated content for `key`.
    pub fn content(&self, key: &str) -> Option<&str> {
        self.completed.get(key).map(String::as_str)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty() && self.processed_keys.is_empty()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.completed.clear();
        self.processed_keys.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_stale() -> CheckpointState {
        let mut state = CheckpointState::new();
        state.record("amber-oud", "<p>amber</p>".to_string());
        state.record("cedar-smoke", "<p>cedar</p>".to_string());
        state.processed_keys.insert("half-done".to_string());
        state.processed_keys.insert("another-stale".to_string());
        state
    }

    #[test]
    fn test_record_is_idempotent_last_write_wins() {
        let mut state = CheckpointState::new();
        state.record("p1", "first".to_string());
        state.record("p1", "second".to_string());
        assert_eq!(state.completed_count(), 1);
        assert_eq!(state.content("p1"), Some("second"));
        assert!(state.is_processed("p1"));
        assert!(state.is_consistent());
    }

    #[test]
    fn test_reconcile_discards_stale_keys() {
        let mut state = with_stale();
        assert!(!state.is_consistent());

        let removed = state.reconcile();
        assert_eq!(removed, vec!["another-stale", "half-done"]);
        assert!(state.is_consistent());
        assert_eq!(
            state.processed_keys.iter().collect::<Vec<_>>(),
            vec!["amber-oud", "cedar-smoke"]
        );
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let mut once = with_stale();
        once.reconcile();

        let mut twice = with_stale();
        twice.reconcile();
        let removed_again = twice.reconcile();

        assert!(removed_again.is_empty());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_reconcile_adds_keys_missing_from_processed() {
        let mut state = CheckpointState::new();
        state.completed.insert("orphan".to_string(), "<p>x</p>".to_string());
        assert!(!state.is_processed("orphan"));

        state.reconcile();
        assert!(state.is_processed("orphan"));
    }

    #[test]
    fn test_clear() {
        let mut state = with_stale();
        state.clear();
        assert!(state.is_empty());
    }
}
