//! # cairn-store
//!
//! A low-latency, single-file, embedded key/value blob store. Blobs live
//! in an append-only data region of a sparse, memory-mapped, resizable
//! file that also holds a log-structured index; a side journal file makes
//! mutations crash-consistent. Reads are served straight off the mapping,
//! so random access runs at device bandwidth with no intermediate copies.
//!
//! The main entry point is [`DiskStore`]; [`MemoryStore`] is the trivial
//! in-memory rendition of the same [`BlobStore`] contract.

pub mod api;
pub mod index_log;
pub mod journal;
pub mod layout;
pub mod mem_index;
pub mod memory;
pub mod region;
pub mod store;
pub mod stream;

pub use api::{BlobStore, CancelToken};
pub use cairn_core::{BlobRef, Result, Stats, StatsSnapshot, StoreError};
pub use layout::StoreLayout;
pub use memory::MemoryStore;
pub use store::{DiskStore, StoreOptions};
pub use stream::BlobStream;
