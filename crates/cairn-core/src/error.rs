//! Error kinds surfaced at the store API boundary.
//!
//! A missing key on a read is never an error; those paths return
//! `Ok(None)`. Everything that can actually go wrong is one of the
//! variants below.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The store has been closed; every operation after `close` fails
    /// with this, including a second `close`.
    #[error("store is disposed")]
    Disposed,

    /// A mutation was attempted on a readonly snapshot.
    #[error("store was opened as a readonly snapshot")]
    ReadOnly,

    /// Bad caller input: empty or over-long key, zero-length slice.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A slice request reaches past the end of the blob.
    #[error("slice [{offset}, {offset}+{length}) out of range for blob of {blob_length} bytes")]
    OutOfRange {
        offset: u64,
        length: u64,
        blob_length: u64,
    },

    /// A streaming add was aborted by its cancellation token. The store
    /// is unchanged.
    #[error("operation cancelled")]
    Cancelled,

    /// Disk full, mapping failure, or any other I/O-level fault. A failed
    /// growth is recoverable: the previous mapping and cursors survive.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The file cannot be opened as a store: magic mismatch, unknown
    /// format version, or a header that contradicts the file. Fatal at
    /// open time.
    #[error("corrupt store: {0}")]
    CorruptStore(String),

    /// The path denotes a layout that cannot be opened as-is.
    #[error("layout conflict: {0}")]
    LayoutConflict(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
