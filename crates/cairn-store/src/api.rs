//! # Store contract
//!
//! The capability set every store backend exposes. [`crate::DiskStore`]
//! is the real engine; [`crate::MemoryStore`] is the trivial in-memory
//! rendition. Adapters (compression, delay injection, remote backends)
//! wrap an owned inner `BlobStore` and forward.

use std::io::Read;

use cairn_core::{Result, StatsSnapshot};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation for [`BlobStore::add_stream`]. Cloned tokens
/// share the same flag; cancellation is observed between chunk copies and
/// leaves the store unchanged.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// The common key/value blob store contract.
///
/// Keys are non-empty UTF-8 strings of at most 65535 bytes. Values are
/// uninterpreted bytes. A missing key on any read is `Ok(None)`, never an
/// error.
pub trait BlobStore: Send + Sync {
    /// Store `value` under `key`. Overwriting an existing key is allowed;
    /// the old bytes become garbage (no compaction).
    fn add(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store the bytes read from `source` under `key`, copying in chunks.
    /// `progress` receives cumulative bytes read. When `cancel` fires
    /// between chunks the call fails with `Cancelled` and the store is in
    /// its pre-call state.
    fn add_stream(
        &self,
        key: &str,
        source: &mut dyn Read,
        progress: Option<&mut dyn FnMut(u64)>,
        cancel: Option<&CancelToken>,
    ) -> Result<()>;

    fn contains(&self, key: &str) -> Result<bool>;

    fn get_size(&self, key: &str) -> Result<Option<u64>>;

    /// Owned copy of the blob stored under `key`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Owned copy of `length` bytes starting `offset` bytes into the
    /// blob. `OutOfRange` when the slice reaches past the blob's end.
    fn get_slice(&self, key: &str, offset: u64, length: u32) -> Result<Option<Vec<u8>>>;

    /// Reader positioned `offset` bytes into the blob. Not safe against a
    /// concurrent `remove` or overwrite of the same key.
    fn get_stream(&self, key: &str, offset: u64) -> Result<Option<Box<dyn Read + Send>>>;

    /// Point-in-time enumeration of `(key, length)` pairs.
    fn list(&self) -> Result<Vec<(String, u64)>>;

    /// Logically delete `key`. Removing a missing key succeeds silently.
    fn remove(&self, key: &str) -> Result<()>;

    /// Force everything written so far to durable storage.
    fn flush(&self) -> Result<()>;

    /// Bytes in use (header, index log, blob payloads).
    fn used_bytes(&self) -> Result<u64>;

    /// Bytes reserved on disk (the mapped file size).
    fn reserved_bytes(&self) -> Result<u64>;

    fn version(&self) -> &'static str;

    fn stats(&self) -> StatsSnapshot;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
