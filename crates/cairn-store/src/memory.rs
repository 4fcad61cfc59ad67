//! # In-memory store
//!
//! The trivial rendition of the [`BlobStore`] contract: a lock-guarded
//! map from key to bytes. Useful as a drop-in for tests and as a cheap
//! oracle for the disk engine; nothing survives the process.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use cairn_core::geometry::{slice_in_blob, MAX_KEY_BYTES};
use cairn_core::{Result, Stats, StatsSnapshot, StoreError};

use crate::api::{BlobStore, CancelToken};

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    stats: Stats,
    disposed: AtomicBool,
}

/// Reader over shared bytes, so `get_stream` does not copy the blob.
struct SharedBytesReader {
    bytes: Arc<Vec<u8>>,
    pos: usize,
}

impl Read for SharedBytesReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.bytes[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    fn validate_key(key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(StoreError::InvalidArgument("key must not be empty"));
        }
        if key.len() > MAX_KEY_BYTES {
            return Err(StoreError::InvalidArgument("key exceeds 65535 bytes"));
        }
        if key.contains('\0') {
            return Err(StoreError::InvalidArgument("key must not contain NUL"));
        }
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        self.entries.write().unwrap().clear();
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    fn add(&self, key: &str, value: &[u8]) -> Result<()> {
        Self::validate_key(key)?;
        self.ensure_open()?;
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), Arc::new(value.to_vec()));
        self.stats.record_add(key);
        Ok(())
    }

    fn add_stream(
        &self,
        key: &str,
        source: &mut dyn Read,
        mut progress: Option<&mut dyn FnMut(u64)>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        Self::validate_key(key)?;
        self.ensure_open()?;
        let mut value = Vec::new();
        let mut chunk = vec![0u8; 128 * 1024];
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                return Err(StoreError::Cancelled);
            }
            let n = source.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            value.extend_from_slice(&chunk[..n]);
            if let Some(callback) = progress.as_mut() {
                callback(value.len() as u64);
            }
        }
        self.entries
            .write()
            .unwrap()
            .insert(key.to_string(), Arc::new(value));
        self.stats.record_add(key);
        Ok(())
    }

    fn contains(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        self.stats.record_contains();
        Ok(self.entries.read().unwrap().contains_key(key))
    }

    fn get_size(&self, key: &str) -> Result<Option<u64>> {
        self.ensure_open()?;
        Ok(self
            .entries
            .read()
            .unwrap()
            .get(key)
            .map(|bytes| bytes.len() as u64))
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let hit = self.entries.read().unwrap().get(key).map(|b| b.to_vec());
        self.stats.record_get(hit.is_some());
        Ok(hit)
    }

    fn get_slice(&self, key: &str, offset: u64, length: u32) -> Result<Option<Vec<u8>>> {
        if length == 0 {
            return Err(StoreError::InvalidArgument("slice length must be positive"));
        }
        self.ensure_open()?;
        self.stats.record_get_slice();
        let Some(bytes) = self.entries.read().unwrap().get(key).cloned() else {
            return Ok(None);
        };
        let length = u64::from(length);
        if !slice_in_blob(bytes.len() as u64, offset, length) {
            return Err(StoreError::OutOfRange {
                offset,
                length,
                blob_length: bytes.len() as u64,
            });
        }
        let offset = offset as usize;
        Ok(Some(bytes[offset..offset + length as usize].to_vec()))
    }

    fn get_stream(&self, key: &str, offset: u64) -> Result<Option<Box<dyn Read + Send>>> {
        self.ensure_open()?;
        self.stats.record_get_stream();
        let Some(bytes) = self.entries.read().unwrap().get(key).cloned() else {
            return Ok(None);
        };
        if offset > bytes.len() as u64 {
            return Err(StoreError::OutOfRange {
                offset,
                length: 0,
                blob_length: bytes.len() as u64,
            });
        }
        Ok(Some(Box::new(SharedBytesReader {
            bytes,
            pos: offset as usize,
        })))
    }

    fn list(&self) -> Result<Vec<(String, u64)>> {
        self.ensure_open()?;
        self.stats.record_list();
        Ok(self
            .entries
            .read()
            .unwrap()
            .iter()
            .map(|(key, bytes)| (key.clone(), bytes.len() as u64))
            .collect())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.ensure_open()?;
        let hit = self.entries.write().unwrap().remove(key).is_some();
        self.stats.record_remove(hit);
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        self.stats.record_flush();
        Ok(())
    }

    fn used_bytes(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self
            .entries
            .read()
            .unwrap()
            .values()
            .map(|bytes| bytes.len() as u64)
            .sum())
    }

    fn reserved_bytes(&self) -> Result<u64> {
        self.used_bytes()
    }

    fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_round_trip_matches_contract() {
        let store = MemoryStore::new();
        store.add("foo", b"bar").unwrap();
        assert_eq!(store.get("foo").unwrap().unwrap(), b"bar");
        assert_eq!(store.get_size("foo").unwrap(), Some(3));
        assert!(store.contains("foo").unwrap());
        assert_eq!(store.get("xyz").unwrap(), None);
    }

    #[test]
    fn test_slice_semantics_match_disk_store() {
        let store = MemoryStore::new();
        store.add("k", &[10, 11, 12, 13, 14]).unwrap();
        assert_eq!(store.get_slice("k", 1, 3).unwrap().unwrap(), vec![11, 12, 13]);
        assert!(matches!(
            store.get_slice("k", 5, 1),
            Err(StoreError::OutOfRange { .. })
        ));
        assert!(matches!(
            store.get_slice("k", 0, 0),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_stream_add_with_progress_and_cancel() {
        let store = MemoryStore::new();
        let mut seen = Vec::new();
        store
            .add_stream(
                "k",
                &mut Cursor::new(vec![7u8; 10]),
                Some(&mut |n| seen.push(n)),
                None,
            )
            .unwrap();
        assert_eq!(seen.last(), Some(&10));
        assert_eq!(store.get("k").unwrap().unwrap(), vec![7u8; 10]);

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = store.add_stream("other", &mut Cursor::new(vec![1u8; 4]), None, Some(&cancel));
        assert!(matches!(result, Err(StoreError::Cancelled)));
        assert!(!store.contains("other").unwrap());
    }

    #[test]
    fn test_get_stream_reads_from_offset() {
        let store = MemoryStore::new();
        store.add("k", b"hello world").unwrap();
        let mut reader = store.get_stream("k", 6).unwrap().unwrap();
        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "world");
    }

    #[test]
    fn test_close_disposes() {
        let store = MemoryStore::new();
        store.add("k", b"v").unwrap();
        store.close().unwrap();
        assert!(matches!(store.close(), Err(StoreError::Disposed)));
        assert!(matches!(store.get("k"), Err(StoreError::Disposed)));
    }
}
