//! # Geometry
//!
//! Region layout constants and the pure arithmetic the engine relies on.
//! Keeping this math free of I/O lets `cairn-verify` prove it with Kani.
//!
//! The single store file is laid out as:
//!
//! ```text
//! [0 .. HEADER_SIZE)                      header (magic, version, cursors)
//! [HEADER_SIZE .. HEADER_SIZE + cap)     index log region
//! [HEADER_SIZE + cap .. file end)        data region
//! ```
//!
//! where `cap` is the index capacity fixed when the file is created. The
//! two regions are disjoint by construction, so resizing the data region
//! can never overwrite index records.

/// First eight bytes of every store file.
pub const MAGIC: [u8; 8] = *b"SSTORE\0\0";

/// Current on-disk format version.
pub const FORMAT_VERSION: u32 = 4;

/// Size of the fixed header at offset 0. Cache-line aligned.
pub const HEADER_SIZE: u64 = 64;

/// Byte offset of the `data_end` cursor inside the header.
pub const OFF_DATA_END: u64 = 16;

/// Byte offset of the `index_head` cursor inside the header.
pub const OFF_INDEX_HEAD: u64 = 24;

/// Byte offset of the persisted index capacity inside the header.
pub const OFF_INDEX_CAPACITY: u64 = 32;

/// Default reserved span for the index log. The file is sparse, so the
/// unused part of this region occupies no disk space.
pub const DEFAULT_INDEX_CAPACITY: u64 = 64 * 1024 * 1024;

/// Default initial capacity of the data region for a fresh store.
pub const DEFAULT_INITIAL_SIZE: u64 = 1024 * 1024;

/// Above this size the file grows by fixed 1 GiB steps instead of doubling.
pub const DOUBLING_LIMIT: u64 = 1024 * 1024 * 1024;

/// Keys are length-prefixed with a u16.
pub const MAX_KEY_BYTES: usize = 65535;

/// First byte of the data region for a given index capacity.
#[inline]
pub const fn data_start(index_capacity: u64) -> u64 {
    HEADER_SIZE + index_capacity
}

/// First byte past the index log region.
#[inline]
pub const fn index_end(index_capacity: u64) -> u64 {
    HEADER_SIZE + index_capacity
}

/// New file size when an append needs the file to cover `required` bytes.
///
/// Doubles the file until [`DOUBLING_LIMIT`], then grows by 1 GiB steps.
/// The result always covers `required` and never shrinks, which bounds the
/// amortized remap cost to O(log total) while keeping large files from
/// doubling into oblivion.
#[inline]
pub fn growth_target(current: u64, required: u64) -> u64 {
    let step = if current < DOUBLING_LIMIT {
        current.saturating_mul(2)
    } else {
        current.saturating_add(DOUBLING_LIMIT)
    };
    step.max(required).max(current)
}

/// Whether `[offset, offset + length)` is a valid slice of a blob of
/// `blob_length` bytes. Overflow-safe: `offset + length` is never computed
/// when it could wrap.
#[inline]
pub const fn slice_in_blob(blob_length: u64, offset: u64, length: u64) -> bool {
    length > 0 && offset < blob_length && blob_length - offset >= length
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_start_follows_index_region() {
        assert_eq!(data_start(0), HEADER_SIZE);
        assert_eq!(data_start(1024), HEADER_SIZE + 1024);
        assert_eq!(data_start(1024), index_end(1024));
    }

    #[test]
    fn test_growth_doubles_small_files() {
        assert_eq!(growth_target(1024, 1500), 2048);
        assert_eq!(growth_target(1024 * 1024, 0), 2 * 1024 * 1024);
    }

    #[test]
    fn test_growth_covers_oversized_requirement() {
        // A single append larger than the doubled size wins.
        assert_eq!(growth_target(1024, 10_000), 10_000);
    }

    #[test]
    fn test_growth_is_additive_past_limit() {
        let current = 3 * DOUBLING_LIMIT;
        assert_eq!(growth_target(current, 0), current + DOUBLING_LIMIT);
    }

    #[test]
    fn test_growth_never_shrinks() {
        assert!(growth_target(u64::MAX - 10, 0) >= u64::MAX - 10);
    }

    #[test]
    fn test_slice_bounds() {
        assert!(slice_in_blob(10, 0, 10));
        assert!(slice_in_blob(10, 9, 1));
        assert!(!slice_in_blob(10, 10, 1));
        assert!(!slice_in_blob(10, 4, 7));
        assert!(!slice_in_blob(10, 0, 0));
        assert!(!slice_in_blob(0, 0, 1));
        // offset + length would overflow a u64
        assert!(!slice_in_blob(10, 5, u64::MAX));
    }
}
