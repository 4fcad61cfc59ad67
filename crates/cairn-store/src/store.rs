//! # Store engine
//!
//! [`DiskStore`] composes the mapped region, the index log, the side
//! journal, and the in-memory index into the public key/value API.
//!
//! One writer lock serializes every mutation. Readers never take it: a
//! lookup hits the in-memory index, then clones the current mapping `Arc`
//! and copies the blob bytes straight out of the mapping. The commit
//! ordering for a mutation is payload bytes, index record, journal
//! intent, header cursor release-stores, in-memory index. A crash between
//! any two steps leaves the header pointing at a consistent prefix.
//!
//! Lifecycle: opening (the `open*` constructors), ready, transiently
//! resizing inside `grow_for` (mutations block on the writer lock, reads
//! of new entries cannot start until the insert that follows), a faulted
//! sub-state after an unrecoverable error (reads still served, mutations
//! fail fast), and closed (`close`; everything afterwards fails
//! `Disposed`, including a second `close`).

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use fs2::FileExt;
use tracing::{debug, info, warn};

use cairn_core::geometry::{
    growth_target, slice_in_blob, DEFAULT_INDEX_CAPACITY, DEFAULT_INITIAL_SIZE, HEADER_SIZE,
    MAX_KEY_BYTES, OFF_DATA_END, OFF_INDEX_HEAD,
};
use cairn_core::record::{IndexRecord, JournalRecord, JOURNAL_OP_ADD, JOURNAL_OP_REMOVE};
use cairn_core::{BlobRef, Header, Result, Stats, StatsSnapshot, StoreError};

use crate::api::{BlobStore, CancelToken};
use crate::index_log;
use crate::journal::{self, Journal};
use crate::layout::{self, sibling, StoreLayout};
use crate::mem_index::MemIndex;
use crate::region::{GrowError, Mapping, Region};
use crate::stream::BlobStream;

/// Copy granularity for [`DiskStore::add_stream`]. Cancellation and
/// progress are observed between chunks.
const STREAM_CHUNK: usize = 128 * 1024;

/// Creation-time knobs for a fresh store file. Ignored when the file
/// already exists (its header wins).
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Initial capacity of the data region.
    pub initial_size: u64,
    /// Reserved span for the index log, fixed for the file's lifetime.
    /// The file is sparse, so an oversized reservation is free on disk.
    pub index_capacity: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            initial_size: DEFAULT_INITIAL_SIZE,
            index_capacity: DEFAULT_INDEX_CAPACITY,
        }
    }
}

enum Mode {
    ReadWrite,
    /// Frozen cursors captured at open; the snapshot never refreshes.
    Snapshot { data_end: u64, index_head: u64 },
}

/// Everything a mutation needs, guarded by the writer lock.
struct WriterState {
    region: Region,
    journal: Option<Journal>,
    data_end: u64,
    index_head: u64,
    /// Holds the advisory lock on `<data>.lock`; dropped on close, or by
    /// the OS if the process dies.
    writer_lock: Option<File>,
}

struct Shared {
    data_path: PathBuf,
    mode: Mode,
    index_capacity: u64,
    mapping: RwLock<Arc<Mapping>>,
    writer: Mutex<WriterState>,
    index: MemIndex,
    stats: Stats,
    disposed: AtomicBool,
    faulted: AtomicBool,
}

/// The single-file memory-mapped blob store.
pub struct DiskStore {
    shared: Arc<Shared>,
}

impl DiskStore {
    /// Open or create the store at `path` with default options.
    ///
    /// `path` may be a single store file, a folder holding a merged
    /// `data.bin`, or a legacy folder with separate `data.bin` and
    /// `index.bin` (converted in place on first open).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, StoreOptions::default())
    }

    pub fn open_with(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref();
        let data_path = match layout::detect(path)? {
            StoreLayout::SingleFile => path.to_path_buf(),
            StoreLayout::FolderWithMergedDataAndIndexFile => path.join(layout::DATA_FILE_NAME),
            StoreLayout::FolderWithStandaloneDataAndIndexFiles => {
                layout::migrate_legacy_folder(path, &options)?;
                path.join(layout::DATA_FILE_NAME)
            }
            StoreLayout::NewlyCreated => {
                if path.is_dir() {
                    path.join(layout::DATA_FILE_NAME)
                } else {
                    path.to_path_buf()
                }
            }
            StoreLayout::Invalid => {
                return Err(StoreError::LayoutConflict(format!(
                    "{} is not a recognized store layout",
                    path.display()
                )))
            }
        };
        Self::open_data_rw(&data_path, &options)
    }

    /// Open a readonly snapshot of the store at `path`.
    ///
    /// The snapshot observes exactly the keys committed at open time;
    /// writes performed afterwards by a coexisting writer never appear.
    /// Any number of snapshots may coexist with one writer.
    pub fn open_snapshot(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data_path = match layout::detect(path)? {
            StoreLayout::SingleFile => path.to_path_buf(),
            StoreLayout::FolderWithMergedDataAndIndexFile => path.join(layout::DATA_FILE_NAME),
            StoreLayout::FolderWithStandaloneDataAndIndexFiles => {
                return Err(StoreError::LayoutConflict(
                    "legacy folder layout; open read-write once to convert".to_string(),
                ))
            }
            StoreLayout::NewlyCreated => {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no store at {}", path.display()),
                )))
            }
            StoreLayout::Invalid => {
                return Err(StoreError::LayoutConflict(format!(
                    "{} is not a recognized store layout",
                    path.display()
                )))
            }
        };

        let region = Region::open_ro(&data_path)?;
        let map = region.mapping();
        if map.len() < HEADER_SIZE as usize {
            return Err(StoreError::CorruptStore(format!(
                "file too small for header: {} bytes",
                map.len()
            )));
        }
        let mut header = Header::decode(&map.read_bytes(0, HEADER_SIZE as usize))?;
        // A live writer may be mid-commit; the cursors must come from the
        // aligned acquire loads, not the plain header copy.
        header.data_end = map.read_u64(OFF_DATA_END);
        header.index_head = map.read_u64(OFF_INDEX_HEAD);
        // A crashed writer may have left torn cursors; resolve them in
        // memory only, the snapshot cannot write the file.
        if let Some(intent) = journal::last_intent(&sibling(&data_path, ".log"))? {
            let (data_end, index_head, _) =
                journal::effective_cursors(&intent, header.data_end, header.index_head);
            header.data_end = data_end;
            header.index_head = index_head;
        }
        Self::validate_header(&header, region.len())?;

        let index = MemIndex::new();
        let replay = index_log::replay(&map, &header, &index);
        header.index_head = replay.index_head;
        info!(
            path = %data_path.display(),
            entries = index.len(),
            "store opened as readonly snapshot"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                data_path,
                mode: Mode::Snapshot {
                    data_end: header.data_end,
                    index_head: header.index_head,
                },
                index_capacity: header.index_capacity,
                mapping: RwLock::new(map),
                writer: Mutex::new(WriterState {
                    region,
                    journal: None,
                    data_end: header.data_end,
                    index_head: header.index_head,
                    writer_lock: None,
                }),
                index,
                stats: Stats::new(),
                disposed: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
            }),
        })
    }

    fn open_data_rw(data_path: &Path, options: &StoreOptions) -> Result<Self> {
        let writer_lock = Self::acquire_writer_lock(data_path)?;
        let fresh = match fs::metadata(data_path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => return Err(e.into()),
        };
        let journal_path = sibling(data_path, ".log");

        let (region, mut header) = if fresh {
            let header = Header::new_empty(options.index_capacity);
            let region = Region::create(data_path, header.data_start() + options.initial_size)?;
            let map = region.mapping();
            map.write_bytes(0, &header.encode());
            map.flush_range(0, HEADER_SIZE as usize)?;
            info!(path = %data_path.display(), "created new store");
            (region, header)
        } else {
            let region = Region::open_rw(data_path)?;
            let map = region.mapping();
            if map.len() < HEADER_SIZE as usize {
                return Err(StoreError::CorruptStore(format!(
                    "file too small for header: {} bytes",
                    map.len()
                )));
            }
            let mut header = Header::decode(&map.read_bytes(0, HEADER_SIZE as usize))?;
            if let Some(intent) = journal::last_intent(&journal_path)? {
                let (data_end, index_head, rolled_back) =
                    journal::effective_cursors(&intent, header.data_end, header.index_head);
                if rolled_back {
                    map.write_u64(OFF_DATA_END, data_end);
                    map.write_u64(OFF_INDEX_HEAD, index_head);
                    map.flush_range(0, HEADER_SIZE as usize)?;
                    header.data_end = data_end;
                    header.index_head = index_head;
                }
            }
            Self::validate_header(&header, region.len())?;
            (region, header)
        };

        let map = region.mapping();
        let index = MemIndex::new();
        let replay = index_log::replay(&map, &header, &index);
        if replay.truncated_tail {
            // Pin the halt position so a stale tail can never resurrect,
            // even if later appends stop short of overwriting it.
            if replay.index_head < header.index_end() {
                map.write_bytes(replay.index_head, &[0]);
            }
            map.write_u64(OFF_INDEX_HEAD, replay.index_head);
            map.flush_range(0, HEADER_SIZE as usize)?;
            header.index_head = replay.index_head;
        }

        let mut journal = Journal::open(&journal_path)?;
        journal.truncate()?;
        journal.sync()?;

        info!(
            path = %data_path.display(),
            entries = index.len(),
            "store opened read-write"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                data_path: data_path.to_path_buf(),
                mode: Mode::ReadWrite,
                index_capacity: header.index_capacity,
                mapping: RwLock::new(map),
                writer: Mutex::new(WriterState {
                    region,
                    journal: Some(journal),
                    data_end: header.data_end,
                    index_head: header.index_head,
                    writer_lock: Some(writer_lock),
                }),
                index,
                stats: Stats::new(),
                disposed: AtomicBool::new(false),
                faulted: AtomicBool::new(false),
            }),
        })
    }

    fn acquire_writer_lock(data_path: &Path) -> Result<File> {
        let lock_path = sibling(data_path, ".lock");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        file.try_lock_exclusive().map_err(|_| {
            StoreError::Io(io::Error::new(
                io::ErrorKind::WouldBlock,
                format!("another writer holds {}", lock_path.display()),
            ))
        })?;
        Ok(file)
    }

    fn validate_header(header: &Header, file_len: u64) -> Result<()> {
        if header.index_head < HEADER_SIZE
            || header.index_head > header.index_end()
            || header.data_end < header.data_start()
            || header.data_end > file_len
        {
            return Err(StoreError::CorruptStore(format!(
                "header cursors out of bounds (data_end {}, index_head {}, file {} bytes)",
                header.data_end, header.index_head, file_len
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Gates and shared read plumbing
    // -------------------------------------------------------------------------

    fn ensure_open(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if let Mode::Snapshot { .. } = self.shared.mode {
            return Err(StoreError::ReadOnly);
        }
        if self.shared.faulted.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "store is in a faulted state",
            )));
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

    /// The current mapping. Loaded after an index hit, so it always
    /// covers the blob that hit: the writer publishes a grown mapping
    /// before inserting entries that live in the grown span.
    fn current_mapping(&self) -> Arc<Mapping> {
        Arc::clone(&self.shared.mapping.read().unwrap())
    }

    fn cursors(&self) -> (u64, u64) {
        match self.shared.mode {
            Mode::Snapshot {
                data_end,
                index_head,
            } => (data_end, index_head),
            Mode::ReadWrite => {
                let map = self.current_mapping();
                (map.read_u64(OFF_DATA_END), map.read_u64(OFF_INDEX_HEAD))
            }
        }
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Grow the file so it covers `required` bytes, publishing the new
    /// mapping. Disk-full leaves the previous mapping and cursors fully
    /// intact; a remap failure faults the store.
    fn grow_for(&self, writer: &mut WriterState, required: u64) -> Result<()> {
        if required <= writer.region.len() {
            return Ok(());
        }
        let target = growth_target(writer.region.len(), required);
        match writer.region.grow_to(target) {
            Ok(map) => {
                *self.shared.mapping.write().unwrap() = map;
                Ok(())
            }
            Err(GrowError::NoSpace(e)) => {
                warn!(target, error = %e, "growth failed, store remains usable");
                Err(StoreError::Io(e))
            }
            Err(GrowError::Remap(e)) => {
                self.shared.faulted.store(true, Ordering::SeqCst);
                warn!(target, error = %e, "remap failed, store is faulted");
                Err(StoreError::Io(e))
            }
        }
    }

    fn check_index_room(&self, writer: &WriterState, record_len: usize) -> Result<()> {
        let index_end = HEADER_SIZE + self.shared.index_capacity;
        if !index_log::has_room(writer.index_head, index_end, record_len) {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                "index log region is full",
            )));
        }
        Ok(())
    }

    /// Append the index record and commit the mutation: journal intent,
    /// then both header cursors as release-stores. The caller has already
    /// written any payload bytes and checked the index region has room.
    fn commit(
        &self,
        writer: &mut WriterState,
        op: u8,
        key: &str,
        record_bytes: &[u8],
        post_data_end: u64,
    ) -> Result<()> {
        let map = writer.region.mapping();
        index_log::append(&map, writer.index_head, record_bytes);
        let post_index_head = writer.index_head + record_bytes.len() as u64;

        let intent = JournalRecord {
            op,
            key_hash: JournalRecord::key_hash_of(key),
            pre_data_end: writer.data_end,
            pre_index_head: writer.index_head,
            post_data_end,
            post_index_head,
        };
        if let Some(journal) = writer.journal.as_mut() {
            if let Err(e) = journal.append(&intent) {
                // The mutation never reached the header; the store state
                // is the pre-mutation state, but the journal can no
                // longer cover future commits.
                self.shared.faulted.store(true, Ordering::SeqCst);
                warn!(error = %e, "journal append failed, store is faulted");
                return Err(e.into());
            }
        }

        map.write_u64(OFF_DATA_END, post_data_end);
        map.write_u64(OFF_INDEX_HEAD, post_index_head);
        writer.data_end = post_data_end;
        writer.index_head = post_index_head;
        Ok(())
    }

    pub fn add(&self, key: &str, value: &[u8]) -> Result<()> {
        Self::validate_key(key)?;
        self.ensure_writable()?;
        let mut writer = self.shared.writer.lock().unwrap();
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }

        let blob = BlobRef {
            offset: writer.data_end,
            length: value.len() as u64,
        };
        let record_bytes = IndexRecord::Add {
            key: key.to_string(),
            blob,
        }
        .encode();
        self.check_index_room(&writer, record_bytes.len())?;

        let post_data_end = writer.data_end + value.len() as u64;
        self.grow_for(&mut writer, post_data_end)?;
        writer.region.mapping().write_bytes(blob.offset, value);
        self.commit(&mut writer, JOURNAL_OP_ADD, key, &record_bytes, post_data_end)?;

        self.shared.index.insert(key.to_string(), blob);
        self.shared.stats.record_add(key);
        debug!(key, bytes = value.len(), "add");
        Ok(())
    }

    /// Stream-copy `source` into the store under `key`.
    ///
    /// Bytes land in the data region as they are read, but nothing is
    /// committed until the source is exhausted; a cancellation or read
    /// error between chunks leaves the store in its pre-call state (the
    /// copied bytes sit past `data_end`, invisible and reusable).
    pub fn add_stream(
        &self,
        key: &str,
        source: &mut dyn Read,
        mut progress: Option<&mut dyn FnMut(u64)>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        Self::validate_key(key)?;
        self.ensure_writable()?;
        let mut writer = self.shared.writer.lock().unwrap();
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }

        let start = writer.data_end;
        let mut total: u64 = 0;
        let mut chunk = vec![0u8; STREAM_CHUNK];
        loop {
            if cancel.is_some_and(CancelToken::is_cancelled) {
                debug!(key, copied = total, "stream add cancelled");
                return Err(StoreError::Cancelled);
            }
            let n = source.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.grow_for(&mut writer, start + total + n as u64)?;
            writer
                .region
                .mapping()
                .write_bytes(start + total, &chunk[..n]);
            total += n as u64;
            if let Some(callback) = progress.as_mut() {
                callback(total);
            }
        }

        let blob = BlobRef {
            offset: start,
            length: total,
        };
        let record_bytes = IndexRecord::Add {
            key: key.to_string(),
            blob,
        }
        .encode();
        self.check_index_room(&writer, record_bytes.len())?;
        self.commit(&mut writer, JOURNAL_OP_ADD, key, &record_bytes, start + total)?;

        self.shared.index.insert(key.to_string(), blob);
        self.shared.stats.record_add(key);
        debug!(key, bytes = total, "add (streamed)");
        Ok(())
    }

    /// Logically delete `key` by appending a tombstone record. The blob
    /// bytes stay where they are. Removing a missing key succeeds and
    /// only bumps the invalid-key counter.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        let mut writer = self.shared.writer.lock().unwrap();
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        if self.shared.index.lookup(key).is_none() {
            self.shared.stats.record_remove(false);
            return Ok(());
        }

        let record_bytes = IndexRecord::Remove {
            key: key.to_string(),
        }
        .encode();
        self.check_index_room(&writer, record_bytes.len())?;
        let post_data_end = writer.data_end;
        self.commit(&mut writer, JOURNAL_OP_REMOVE, key, &record_bytes, post_data_end)?;

        self.shared.index.erase(key);
        self.shared.stats.record_remove(true);
        debug!(key, "remove");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    pub fn contains(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        self.shared.stats.record_contains();
        Ok(self.shared.index.lookup(key).is_some())
    }

    pub fn get_size(&self, key: &str) -> Result<Option<u64>> {
        self.ensure_open()?;
        Ok(self.shared.index.lookup(key).map(|blob| blob.length))
    }

    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let Some(blob) = self.shared.index.lookup(key) else {
            self.shared.stats.record_get(false);
            return Ok(None);
        };
        let map = self.current_mapping();
        if blob.offset + blob.length > map.len() as u64 {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "mapping does not cover blob",
            )));
        }
        let buf = map.read_bytes(blob.offset, blob.length as usize);
        self.shared.stats.record_get(true);
        Ok(Some(buf))
    }

    pub fn get_slice(&self, key: &str, offset: u64, length: u32) -> Result<Option<Vec<u8>>> {
        if length == 0 {
            return Err(StoreError::InvalidArgument("slice length must be positive"));
        }
        self.ensure_open()?;
        self.shared.stats.record_get_slice();
        let Some(blob) = self.shared.index.lookup(key) else {
            return Ok(None);
        };
        let length = u64::from(length);
        if !slice_in_blob(blob.length, offset, length) {
            return Err(StoreError::OutOfRange {
                offset,
                length,
                blob_length: blob.length,
            });
        }
        let map = self.current_mapping();
        Ok(Some(map.read_bytes(blob.offset + offset, length as usize)))
    }

    /// Reader positioned `offset` bytes into the blob, straight over the
    /// mapping. Valid while the store is open; not safe against a
    /// concurrent `remove` or overwrite of the same key.
    pub fn get_stream(&self, key: &str, offset: u64) -> Result<Option<BlobStream>> {
        self.ensure_open()?;
        self.shared.stats.record_get_stream();
        let Some(blob) = self.shared.index.lookup(key) else {
            return Ok(None);
        };
        if offset > blob.length {
            return Err(StoreError::OutOfRange {
                offset,
                length: 0,
                blob_length: blob.length,
            });
        }
        let map = self.current_mapping();
        Ok(Some(BlobStream::new(
            map,
            blob.offset + offset,
            blob.offset + blob.length,
        )))
    }

    pub fn list(&self) -> Result<Vec<(String, u64)>> {
        self.ensure_open()?;
        self.shared.stats.record_list();
        Ok(self.shared.index.snapshot())
    }

    // -------------------------------------------------------------------------
    // Maintenance
    // -------------------------------------------------------------------------

    /// Force the mapping to durable storage. After this returns, a fresh
    /// process sees every write that returned before the call. Also drops
    /// the journal history, which recovery can no longer need.
    pub fn flush(&self) -> Result<()> {
        self.ensure_open()?;
        if let Mode::ReadWrite = self.shared.mode {
            let mut writer = self.shared.writer.lock().unwrap();
            writer.region.flush()?;
            if let Some(journal) = writer.journal.as_mut() {
                journal.truncate()?;
                journal.sync()?;
            }
        }
        self.shared.stats.record_flush();
        Ok(())
    }

    /// Bytes in use: header, index log, and blob payloads.
    pub fn used_bytes(&self) -> Result<u64> {
        self.ensure_open()?;
        let (data_end, index_head) = self.cursors();
        let data_start = HEADER_SIZE + self.shared.index_capacity;
        Ok(index_head + (data_end - data_start))
    }

    /// Bytes reserved on disk: the mapped file size.
    pub fn reserved_bytes(&self) -> Result<u64> {
        self.ensure_open()?;
        Ok(self.current_mapping().len() as u64)
    }

    pub fn version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Arm the disk-full test hook: the next growth attempt fails as if
    /// the device were out of space, without touching the file.
    pub fn simulate_full_disk_on_next_resize(&self) {
        self.shared.writer.lock().unwrap().region.set_fail_next_grow();
    }

    /// Flush, truncate the journal, release the mapping's writer lock and
    /// the file. Every later operation, including a second `close`, fails
    /// with `Disposed`.
    pub fn close(&self) -> Result<()> {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Disposed);
        }
        let mut writer = self.shared.writer.lock().unwrap();
        if let Mode::ReadWrite = self.shared.mode {
            writer.region.flush()?;
            if let Some(journal) = writer.journal.as_mut() {
                journal.truncate()?;
                journal.sync()?;
            }
        }
        writer.journal = None;
        writer.writer_lock = None;
        info!(path = %self.shared.data_path.display(), "store closed");
        Ok(())
    }
}

impl Drop for DiskStore {
    fn drop(&mut self) {
        if !self.shared.disposed.load(Ordering::SeqCst) {
            let _ = self.close();
        }
    }
}

impl BlobStore for DiskStore {
    fn add(&self, key: &str, value: &[u8]) -> Result<()> {
        DiskStore::add(self, key, value)
    }

    fn add_stream(
        &self,
        key: &str,
        source: &mut dyn Read,
        progress: Option<&mut dyn FnMut(u64)>,
        cancel: Option<&CancelToken>,
    ) -> Result<()> {
        DiskStore::add_stream(self, key, source, progress, cancel)
    }

    fn contains(&self, key: &str) -> Result<bool> {
        DiskStore::contains(self, key)
    }

    fn get_size(&self, key: &str) -> Result<Option<u64>> {
        DiskStore::get_size(self, key)
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        DiskStore::get(self, key)
    }

    fn get_slice(&self, key: &str, offset: u64, length: u32) -> Result<Option<Vec<u8>>> {
        DiskStore::get_slice(self, key, offset, length)
    }

    fn get_stream(&self, key: &str, offset: u64) -> Result<Option<Box<dyn Read + Send>>> {
        Ok(DiskStore::get_stream(self, key, offset)?
            .map(|stream| Box::new(stream) as Box<dyn Read + Send>))
    }

    fn list(&self) -> Result<Vec<(String, u64)>> {
        DiskStore::list(self)
    }

    fn remove(&self, key: &str) -> Result<()> {
        DiskStore::remove(self, key)
    }

    fn flush(&self) -> Result<()> {
        DiskStore::flush(self)
    }

    fn used_bytes(&self) -> Result<u64> {
        DiskStore::used_bytes(self)
    }

    fn reserved_bytes(&self) -> Result<u64> {
        DiskStore::reserved_bytes(self)
    }

    fn version(&self) -> &'static str {
        DiskStore::version(self)
    }

    fn stats(&self) -> StatsSnapshot {
        DiskStore::stats(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn small_options() -> StoreOptions {
        StoreOptions {
            initial_size: 1024,
            index_capacity: 4096,
        }
    }

    #[test]
    fn test_add_get_round_trip() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        store.add("foo", b"bar").unwrap();
        assert_eq!(store.get("foo").unwrap().unwrap(), b"bar");
        assert!(store.contains("foo").unwrap());
        assert_eq!(store.get_size("foo").unwrap(), Some(3));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_empty_value_round_trips() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        store.add("empty", b"").unwrap();
        assert_eq!(store.get("empty").unwrap(), Some(Vec::new()));
        assert_eq!(store.get_size("empty").unwrap(), Some(0));
    }

    #[test]
    fn test_key_validation() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        assert!(matches!(
            store.add("", b"x"),
            Err(StoreError::InvalidArgument(_))
        ));
        let long_key = "k".repeat(MAX_KEY_BYTES + 1);
        assert!(matches!(
            store.add(&long_key, b"x"),
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.add("nul\0key", b"x"),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_overwrite_keeps_old_bytes_as_garbage() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        store.add("k", b"first").unwrap();
        let used_after_first = store.used_bytes().unwrap();
        store.add("k", b"second").unwrap();
        assert_eq!(store.get("k").unwrap().unwrap(), b"second");
        assert_eq!(store.list().unwrap().len(), 1);
        assert!(store.used_bytes().unwrap() > used_after_first);
    }

    #[test]
    fn test_double_close_fails_disposed() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        store.close().unwrap();
        assert!(matches!(store.close(), Err(StoreError::Disposed)));
        assert!(matches!(store.get("k"), Err(StoreError::Disposed)));
        assert!(matches!(store.add("k", b"v"), Err(StoreError::Disposed)));
        assert!(matches!(store.flush(), Err(StoreError::Disposed)));
    }

    #[test]
    fn test_second_writer_fails_to_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let _store = DiskStore::open_with(&path, small_options()).unwrap();
        assert!(matches!(
            DiskStore::open_with(&path, small_options()),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_writer_lock_released_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let store = DiskStore::open_with(&path, small_options()).unwrap();
        store.close().unwrap();
        DiskStore::open_with(&path, small_options()).unwrap();
    }

    #[test]
    fn test_snapshot_rejects_mutations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.bin");
        let store = DiskStore::open_with(&path, small_options()).unwrap();
        store.add("k", b"v").unwrap();
        let snapshot = DiskStore::open_snapshot(&path).unwrap();
        assert!(matches!(
            snapshot.add("other", b"x"),
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(snapshot.remove("k"), Err(StoreError::ReadOnly)));
        assert_eq!(snapshot.get("k").unwrap().unwrap(), b"v");
    }

    #[test]
    fn test_grow_on_large_value() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        let reserved_before = store.reserved_bytes().unwrap();
        let big = vec![0xAB; 64 * 1024];
        store.add("big", &big).unwrap();
        assert!(store.reserved_bytes().unwrap() > reserved_before);
        assert_eq!(store.get("big").unwrap().unwrap(), big);
    }

    #[test]
    fn test_disk_full_is_recoverable() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        store.add("a", b"1").unwrap();
        store.simulate_full_disk_on_next_resize();
        let big = vec![0u8; 1 << 20];
        assert!(matches!(store.add("c", &big), Err(StoreError::Io(_))));
        // Previous data still readable, and a retry succeeds.
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
        store.add("c", &big).unwrap();
        assert_eq!(store.get("c").unwrap().unwrap().len(), big.len());
    }

    #[test]
    fn test_index_region_full_fails_recoverably() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(
            dir.path().join("s.bin"),
            StoreOptions {
                initial_size: 4096,
                index_capacity: 64,
            },
        )
        .unwrap();
        store.add("a", b"1").unwrap();
        store.add("b", b"2").unwrap();
        // 64 bytes hold two small add records but not a third.
        assert!(matches!(store.add("c", b"3"), Err(StoreError::Io(_))));
        assert_eq!(store.get("a").unwrap().unwrap(), b"1");
        assert_eq!(store.get("b").unwrap().unwrap(), b"2");
    }

    #[test]
    fn test_stats_counters() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        store.add("k", b"v").unwrap();
        store.get("k").unwrap();
        store.get("missing").unwrap();
        store.remove("k").unwrap();
        store.remove("k").unwrap();
        store.list().unwrap();
        store.flush().unwrap();
        let stats = store.stats();
        assert_eq!(stats.count_add, 1);
        assert_eq!(stats.count_get, 2);
        assert_eq!(stats.count_get_invalid_key, 1);
        assert_eq!(stats.count_remove, 1);
        assert_eq!(stats.count_remove_invalid_key, 1);
        assert_eq!(stats.count_list, 1);
        assert_eq!(stats.count_flush, 1);
        assert_eq!(stats.latest_key_added.as_deref(), Some("k"));
        assert_eq!(stats.latest_key_flushed.as_deref(), Some("k"));
    }

    #[test]
    fn test_version_is_crate_version() {
        let dir = tempdir().unwrap();
        let store = DiskStore::open_with(dir.path().join("s.bin"), small_options()).unwrap();
        assert_eq!(store.version(), env!("CARGO_PKG_VERSION"));
    }
}
