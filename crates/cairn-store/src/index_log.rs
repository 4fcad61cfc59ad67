//! # Index log
//!
//! The append-only log of `{Add, Remove}` records embedded in the store
//! file, occupying the fixed region between the header and the data
//! region. Appends land at `index_head`; on open the committed span is
//! replayed in order to rebuild the in-memory index.
//!
//! Replay halts at the first record that is malformed, truncated, or
//! references blob bytes the data cursor does not cover (a torn tail from
//! a crash). The position of that record becomes the authoritative
//! `index_head`, truncating the tail.

use tracing::warn;

use cairn_core::geometry::HEADER_SIZE;
use cairn_core::record::IndexRecord;
use cairn_core::Header;

use crate::mem_index::MemIndex;
use crate::region::Mapping;

/// Outcome of replaying the committed index log span.
#[derive(Debug, PartialEq, Eq)]
pub struct Replay {
    /// Position replay stopped at; the authoritative next write offset.
    pub index_head: u64,
    /// Whether replay stopped before the header's `index_head`.
    pub truncated_tail: bool,
    /// Records applied.
    pub applied: usize,
}

/// Whether a record of `record_len` bytes still fits the index region.
#[inline]
pub fn has_room(index_head: u64, index_end: u64, record_len: usize) -> bool {
    index_head <= index_end && index_end - index_head >= record_len as u64
}

/// Write one pre-encoded record at `index_head`. The caller checked
/// [`has_room`] and advances the header cursor afterwards.
#[inline]
pub fn append(map: &Mapping, index_head: u64, record_bytes: &[u8]) {
    map.write_bytes(index_head, record_bytes);
}

/// Rebuild `index` from the log records in `[HEADER_SIZE, index_head)`.
///
/// Later records win: an `Add` overwrites any prior entry for the key, a
/// `Remove` deletes it.
pub fn replay(map: &Mapping, header: &Header, index: &MemIndex) -> Replay {
    let end = header.index_head.min(header.index_end());
    let data_start = header.data_start();
    let mut pos = HEADER_SIZE;
    let mut applied = 0usize;

    while pos < end {
        let prefix_len = 3.min((end - pos) as usize);
        let mut prefix = [0u8; 3];
        map.read_into(pos, &mut prefix[..prefix_len]);
        let Some(total) = IndexRecord::frame_len(&prefix[..prefix_len]) else {
            break;
        };
        if pos + total as u64 > end {
            break;
        }
        let bytes = map.read_bytes(pos, total);
        let Some((record, _)) = IndexRecord::decode(&bytes) else {
            break;
        };
        match record {
            IndexRecord::Add { key, blob } => {
                let covered = blob.offset >= data_start
                    && blob
                        .offset
                        .checked_add(blob.length)
                        .is_some_and(|blob_end| blob_end <= header.data_end);
                if !covered {
                    break;
                }
                index.insert(key, blob);
            }
            IndexRecord::Remove { key } => {
                index.erase(&key);
            }
        }
        applied += 1;
        pos += total as u64;
    }

    let truncated_tail = pos != end;
    if truncated_tail {
        warn!(
            halted_at = pos,
            expected = end,
            "index log tail is torn, truncating"
        );
    }
    Replay {
        index_head: pos,
        truncated_tail,
        applied,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::BlobRef;
    use crate::region::Region;
    use tempfile::tempdir;

    const CAP: u64 = 4096;

    fn fixture() -> (tempfile::TempDir, Region, Header) {
        let dir = tempdir().unwrap();
        let region = Region::create(&dir.path().join("s.bin"), HEADER_SIZE + CAP + 4096).unwrap();
        let header = Header::new_empty(CAP);
        (dir, region, header)
    }

    fn push(map: &Mapping, header: &mut Header, record: &IndexRecord) {
        let bytes = record.encode();
        assert!(has_room(header.index_head, header.index_end(), bytes.len()));
        append(map, header.index_head, &bytes);
        header.index_head += bytes.len() as u64;
    }

    fn add(key: &str, offset: u64, length: u64) -> IndexRecord {
        IndexRecord::Add {
            key: key.to_string(),
            blob: BlobRef { offset, length },
        }
    }

    #[test]
    fn test_replay_applies_adds_and_removes_in_order() {
        let (_dir, region, mut header) = fixture();
        let map = region.mapping();
        let data_start = header.data_start();
        header.data_end = data_start + 100;

        push(&map, &mut header, &add("a", data_start, 10));
        push(&map, &mut header, &add("b", data_start + 10, 20));
        push(&map, &mut header, &add("a", data_start + 30, 5));
        push(
            &map,
            &mut header,
            &IndexRecord::Remove {
                key: "b".to_string(),
            },
        );

        let index = MemIndex::new();
        let replay = replay(&map, &header, &index);
        assert_eq!(replay.applied, 4);
        assert!(!replay.truncated_tail);
        assert_eq!(replay.index_head, header.index_head);
        assert_eq!(
            index.lookup("a"),
            Some(BlobRef {
                offset: data_start + 30,
                length: 5
            })
        );
        assert_eq!(index.lookup("b"), None);
    }

    #[test]
    fn test_replay_halts_at_corrupted_record() {
        let (_dir, region, mut header) = fixture();
        let map = region.mapping();
        let data_start = header.data_start();
        header.data_end = data_start + 100;

        push(&map, &mut header, &add("good", data_start, 10));
        let halt_at = header.index_head;
        push(&map, &mut header, &add("bad", data_start + 10, 10));
        // Flip a byte inside the second record's key.
        map.write_bytes(halt_at + 4, &[0xFF]);

        let index = MemIndex::new();
        let replay = replay(&map, &header, &index);
        assert!(replay.truncated_tail);
        assert_eq!(replay.index_head, halt_at);
        assert_eq!(index.len(), 1);
        assert!(index.lookup("good").is_some());
    }

    #[test]
    fn test_replay_halts_at_uncovered_blob() {
        let (_dir, region, mut header) = fixture();
        let map = region.mapping();
        let data_start = header.data_start();
        header.data_end = data_start + 10;

        push(&map, &mut header, &add("committed", data_start, 10));
        let halt_at = header.index_head;
        // Record is intact but its blob lies past data_end: the payload
        // of a mutation whose header advance never happened.
        push(&map, &mut header, &add("torn", data_start + 10, 10));

        let index = MemIndex::new();
        let replay = replay(&map, &header, &index);
        assert!(replay.truncated_tail);
        assert_eq!(replay.index_head, halt_at);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_replay_ignores_bytes_past_index_head() {
        let (_dir, region, mut header) = fixture();
        let map = region.mapping();
        let data_start = header.data_start();
        header.data_end = data_start + 100;

        push(&map, &mut header, &add("a", data_start, 10));
        // A fully intact record past index_head is uncommitted and must
        // stay invisible.
        let bytes = add("uncommitted", data_start + 10, 10).encode();
        append(&map, header.index_head, &bytes);

        let index = MemIndex::new();
        let replay = replay(&map, &header, &index);
        assert!(!replay.truncated_tail);
        assert_eq!(index.len(), 1);
        assert!(index.lookup("uncommitted").is_none());
    }

    #[test]
    fn test_has_room_at_region_boundary() {
        assert!(has_room(64, 100, 36));
        assert!(!has_room(64, 100, 37));
        assert!(!has_room(101, 100, 0));
    }

    #[test]
    fn test_replay_of_empty_log() {
        let (_dir, region, header) = fixture();
        let index = MemIndex::new();
        let replay = replay(&region.mapping(), &header, &index);
        assert_eq!(
            replay,
            Replay {
                index_head: HEADER_SIZE,
                truncated_tail: false,
                applied: 0
            }
        );
    }
}
