//! # Records
//!
//! The three byte-level structures of the store: the file [`Header`], the
//! self-delimiting [`IndexRecord`] appended to the in-file index log, and
//! the fixed-size [`JournalRecord`] appended to the side journal file.
//!
//! All integers are little-endian. Index and journal records carry a
//! trailing CRC32 so a torn tail can be detected on replay.

use crc32fast::Hasher;
use xxhash_rust::xxh3::xxh3_64;

use crate::error::StoreError;
use crate::geometry::{FORMAT_VERSION, HEADER_SIZE, MAGIC};

/// Location of one blob inside the data region.
///
/// Offsets are absolute file positions. Blobs are written once and never
/// moved; a removed blob's bytes stay where they are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobRef {
    pub offset: u64,
    pub length: u64,
}

// =============================================================================
// Header
// =============================================================================

/// The fixed 64-byte prefix of the store file.
///
/// | Offset | Size | Field            |
/// |--------|------|------------------|
/// | 0      | 8    | magic            |
/// | 8      | 4    | format version   |
/// | 12     | 4    | flags            |
/// | 16     | 8    | `data_end`       |
/// | 24     | 8    | `index_head`     |
/// | 32     | 8    | `index_capacity` |
/// | 40     | 24   | reserved (zero)  |
///
/// `data_end` and `index_head` are the commit points of every mutation:
/// they are only advanced after the bytes they cover have been written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub flags: u32,
    pub data_end: u64,
    pub index_head: u64,
    pub index_capacity: u64,
}

impl Header {
    /// Header for a freshly created store: empty index log, empty data
    /// region.
    pub fn new_empty(index_capacity: u64) -> Self {
        Self {
            flags: 0,
            data_end: HEADER_SIZE + index_capacity,
            index_head: HEADER_SIZE,
            index_capacity,
        }
    }

    /// First byte of the data region.
    #[inline]
    pub fn data_start(&self) -> u64 {
        HEADER_SIZE + self.index_capacity
    }

    /// First byte past the index log region.
    #[inline]
    pub fn index_end(&self) -> u64 {
        HEADER_SIZE + self.index_capacity
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&MAGIC);
        buf[8..12].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        buf[12..16].copy_from_slice(&self.flags.to_le_bytes());
        buf[16..24].copy_from_slice(&self.data_end.to_le_bytes());
        buf[24..32].copy_from_slice(&self.index_head.to_le_bytes());
        buf[32..40].copy_from_slice(&self.index_capacity.to_le_bytes());
        buf
    }

    /// Decode and validate a header. Magic or version mismatches are fatal
    /// at open time.
    pub fn decode(buf: &[u8]) -> Result<Self, StoreError> {
        if buf.len() < HEADER_SIZE as usize {
            return Err(StoreError::CorruptStore(format!(
                "file too small for header: {} bytes",
                buf.len()
            )));
        }
        if buf[0..8] != MAGIC {
            return Err(StoreError::CorruptStore(
                "magic bytes do not match".to_string(),
            ));
        }
        let version = u32::from_le_bytes(buf[8..12].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(StoreError::CorruptStore(format!(
                "unsupported format version {version} (expected {FORMAT_VERSION})"
            )));
        }
        Ok(Self {
            flags: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            data_end: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
            index_head: u64::from_le_bytes(buf[24..32].try_into().unwrap()),
            index_capacity: u64::from_le_bytes(buf[32..40].try_into().unwrap()),
        })
    }
}

// =============================================================================
// Index log records
// =============================================================================

/// One entry of the in-file index log.
///
/// Encoding: `tag u8`, `key_len u16`, key bytes (UTF-8), for `Add` an
/// `offset u64` and `length u64`, then a CRC32 over everything before it.
/// The encoding is self-delimiting, so replay can walk the log without a
/// separate length table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexRecord {
    Add { key: String, blob: BlobRef },
    Remove { key: String },
}

pub const TAG_ADD: u8 = 0x01;
pub const TAG_REMOVE: u8 = 0x02;

/// Bytes before the key: tag + key length prefix.
const RECORD_PREFIX: usize = 3;
/// Trailing CRC32.
const RECORD_CRC: usize = 4;

impl IndexRecord {
    pub fn key(&self) -> &str {
        match self {
            IndexRecord::Add { key, .. } => key,
            IndexRecord::Remove { key } => key,
        }
    }

    /// Total encoded size of this record in bytes.
    pub fn encoded_len(&self) -> usize {
        let payload = match self {
            IndexRecord::Add { .. } => 16,
            IndexRecord::Remove { .. } => 0,
        };
        RECORD_PREFIX + self.key().len() + payload + RECORD_CRC
    }

    /// Append the encoded record to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        let (tag, key) = match self {
            IndexRecord::Add { key, .. } => (TAG_ADD, key),
            IndexRecord::Remove { key } => (TAG_REMOVE, key),
        };
        buf.push(tag);
        buf.extend_from_slice(&(key.len() as u16).to_le_bytes());
        buf.extend_from_slice(key.as_bytes());
        if let IndexRecord::Add { blob, .. } = self {
            buf.extend_from_slice(&blob.offset.to_le_bytes());
            buf.extend_from_slice(&blob.length.to_le_bytes());
        }
        let mut hasher = Hasher::new();
        hasher.update(&buf[start..]);
        buf.extend_from_slice(&hasher.finalize().to_le_bytes());
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Total record size implied by the first [`RECORD_PREFIX`] bytes, or
    /// `None` when the prefix itself is malformed. Lets replay read exactly
    /// one record without over-reading.
    pub fn frame_len(prefix: &[u8]) -> Option<usize> {
        if prefix.len() < RECORD_PREFIX {
            return None;
        }
        let payload = match prefix[0] {
            TAG_ADD => 16,
            TAG_REMOVE => 0,
            _ => return None,
        };
        let key_len = u16::from_le_bytes([prefix[1], prefix[2]]) as usize;
        if key_len == 0 {
            return None;
        }
        Some(RECORD_PREFIX + key_len + payload + RECORD_CRC)
    }

    /// Decode one record from the start of `buf`. Returns the record and
    /// the number of bytes consumed, or `None` when the bytes are
    /// malformed or truncated (the replay halt condition).
    pub fn decode(buf: &[u8]) -> Option<(IndexRecord, usize)> {
        let total = Self::frame_len(buf)?;
        if buf.len() < total {
            return None;
        }
        let body = &buf[..total - RECORD_CRC];
        let stored = u32::from_le_bytes(buf[total - RECORD_CRC..total].try_into().ok()?);
        let mut hasher = Hasher::new();
        hasher.update(body);
        if hasher.finalize() != stored {
            return None;
        }

        let key_len = u16::from_le_bytes([buf[1], buf[2]]) as usize;
        let key = std::str::from_utf8(&buf[RECORD_PREFIX..RECORD_PREFIX + key_len])
            .ok()?
            .to_string();
        let record = match buf[0] {
            TAG_ADD => {
                let at = RECORD_PREFIX + key_len;
                IndexRecord::Add {
                    key,
                    blob: BlobRef {
                        offset: u64::from_le_bytes(buf[at..at + 8].try_into().ok()?),
                        length: u64::from_le_bytes(buf[at + 8..at + 16].try_into().ok()?),
                    },
                }
            }
            TAG_REMOVE => IndexRecord::Remove { key },
            _ => return None,
        };
        Some((record, total))
    }
}

// =============================================================================
// Journal records
// =============================================================================

pub const JOURNAL_OP_ADD: u8 = 1;
pub const JOURNAL_OP_REMOVE: u8 = 2;

/// Fixed size of one encoded journal record.
pub const JOURNAL_RECORD_SIZE: usize = 45;

/// One intent record in the side journal file.
///
/// Records the header cursors before the mutation and the cursors the
/// mutation will commit. Recovery compares the header against the last
/// record's pre/post pairs and rolls torn cursors back to `pre`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalRecord {
    pub op: u8,
    pub key_hash: u64,
    pub pre_data_end: u64,
    pub pre_index_head: u64,
    pub post_data_end: u64,
    pub post_index_head: u64,
}

impl JournalRecord {
    /// Hash used for the fixed-width key field. The journal never needs
    /// the key back, only a stable fingerprint for diagnostics.
    #[inline]
    pub fn key_hash_of(key: &str) -> u64 {
        xxh3_64(key.as_bytes())
    }

    pub fn encode(&self) -> [u8; JOURNAL_RECORD_SIZE] {
        let mut buf = [0u8; JOURNAL_RECORD_SIZE];
        buf[0] = self.op;
        buf[1..9].copy_from_slice(&self.key_hash.to_le_bytes());
        buf[9..17].copy_from_slice(&self.pre_data_end.to_le_bytes());
        buf[17..25].copy_from_slice(&self.pre_index_head.to_le_bytes());
        buf[25..33].copy_from_slice(&self.post_data_end.to_le_bytes());
        buf[33..41].copy_from_slice(&self.post_index_head.to_le_bytes());
        let mut hasher = Hasher::new();
        hasher.update(&buf[..41]);
        buf[41..45].copy_from_slice(&hasher.finalize().to_le_bytes());
        buf
    }

    /// Decode one record. `None` for a torn or garbage record.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < JOURNAL_RECORD_SIZE {
            return None;
        }
        let stored = u32::from_le_bytes(buf[41..45].try_into().ok()?);
        let mut hasher = Hasher::new();
        hasher.update(&buf[..41]);
        if hasher.finalize() != stored {
            return None;
        }
        let op = buf[0];
        if op != JOURNAL_OP_ADD && op != JOURNAL_OP_REMOVE {
            return None;
        }
        Some(Self {
            op,
            key_hash: u64::from_le_bytes(buf[1..9].try_into().ok()?),
            pre_data_end: u64::from_le_bytes(buf[9..17].try_into().ok()?),
            pre_index_head: u64::from_le_bytes(buf[17..25].try_into().ok()?),
            post_data_end: u64::from_le_bytes(buf[25..33].try_into().ok()?),
            post_index_head: u64::from_le_bytes(buf[33..41].try_into().ok()?),
        })
    }
}
