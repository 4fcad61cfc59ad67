//! # cairn-core
//!
//! The physical data layout of the store. Everything that ends up on disk
//! is defined here: the file header, the index-log records, the journal
//! records, and the geometry of the regions they live in. No I/O happens
//! in this crate; the engine in `cairn-store` moves these bytes around.

pub mod error;
pub mod geometry;
pub mod record;
pub mod stats;

pub use error::{Result, StoreError};
pub use record::{BlobRef, Header, IndexRecord, JournalRecord};
pub use stats::{Stats, StatsSnapshot};
