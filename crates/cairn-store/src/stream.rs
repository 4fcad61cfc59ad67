//! Streaming views over blobs.
//!
//! A [`BlobStream`] is a positioned reader over the mapped file. It holds
//! its own `Arc` of the mapping, so it survives later file growth (old
//! mappings stay valid; the file only ever gets longer). It does not
//! survive the caller removing or overwriting the same key mid-read; the
//! bytes it returns would then be stale.

use std::io::{self, Read};
use std::sync::Arc;

use crate::region::Mapping;

/// Reader over `[pos, end)` of the store file.
pub struct BlobStream {
    map: Arc<Mapping>,
    pos: u64,
    end: u64,
}

impl BlobStream {
    pub(crate) fn new(map: Arc<Mapping>, start: u64, end: u64) -> Self {
        debug_assert!(start <= end && end <= map.len() as u64);
        Self {
            map,
            pos: start,
            end,
        }
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.end - self.pos
    }
}

impl Read for BlobStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = (self.end - self.pos) as usize;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let n = remaining.min(buf.len());
        self.map.read_into(self.pos, &mut buf[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}
