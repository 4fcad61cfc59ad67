//! # In-memory index
//!
//! `key -> (offset, length)` behind a reader/writer lock. Built from the
//! index log on open, then kept in lockstep with it by the single writer.
//! Lookups take the read side, so any number can run concurrently.

use std::collections::HashMap;
use std::sync::RwLock;

use cairn_core::BlobRef;

#[derive(Debug, Default)]
pub struct MemIndex {
    map: RwLock<HashMap<String, BlobRef>>,
}

impl MemIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, key: &str) -> Option<BlobRef> {
        self.map.read().unwrap().get(key).copied()
    }

    /// Writer-only. Returns the previous entry when `key` was already
    /// present (an overwrite).
    pub fn insert(&self, key: String, blob: BlobRef) -> Option<BlobRef> {
        self.map.write().unwrap().insert(key, blob)
    }

    /// Writer-only. Returns whether the key was present.
    pub fn erase(&self, key: &str) -> bool {
        self.map.write().unwrap().remove(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.map.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().unwrap().is_empty()
    }

    /// Point-in-time enumeration of `(key, length)` pairs. Writes after
    /// the snapshot was taken are not reflected.
    pub fn snapshot(&self) -> Vec<(String, u64)> {
        self.map
            .read()
            .unwrap()
            .iter()
            .map(|(k, blob)| (k.clone(), blob.length))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blob(offset: u64, length: u64) -> BlobRef {
        BlobRef { offset, length }
    }

    #[test]
    fn test_insert_and_lookup() {
        let idx = MemIndex::new();
        assert_eq!(idx.lookup("k"), None);
        assert_eq!(idx.insert("k".to_string(), blob(64, 10)), None);
        assert_eq!(idx.lookup("k"), Some(blob(64, 10)));
    }

    #[test]
    fn test_insert_overwrites_last_writer_wins() {
        let idx = MemIndex::new();
        idx.insert("k".to_string(), blob(64, 10));
        let prev = idx.insert("k".to_string(), blob(128, 20));
        assert_eq!(prev, Some(blob(64, 10)));
        assert_eq!(idx.lookup("k"), Some(blob(128, 20)));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_erase_reports_presence() {
        let idx = MemIndex::new();
        idx.insert("k".to_string(), blob(0, 1));
        assert!(idx.erase("k"));
        assert!(!idx.erase("k"));
        assert_eq!(idx.lookup("k"), None);
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let idx = MemIndex::new();
        idx.insert("a".to_string(), blob(0, 5));
        idx.insert("b".to_string(), blob(5, 7));
        let mut snap = idx.snapshot();
        idx.insert("c".to_string(), blob(12, 1));
        snap.sort();
        assert_eq!(snap, vec![("a".to_string(), 5), ("b".to_string(), 7)]);
    }
}
