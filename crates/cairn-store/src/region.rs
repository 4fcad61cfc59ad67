//! # File-backed region
//!
//! Owns the store file and a memory mapping over it. All reads and writes
//! go through [`Mapping`], which hands out copies (or raw-pointer copies
//! into caller buffers) at absolute file offsets. [`Region`] adds sparse
//! creation, atomic growth (extend + remap), and flushing.
//!
//! Growth publishes a fresh `Arc<Mapping>`; readers that still hold the
//! old `Arc` stay valid because the file only ever gets longer and blob
//! bytes are never moved.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use memmap2::{Mmap, MmapOptions, MmapRaw};
use tracing::debug;

/// A single active mapping over the store file.
///
/// Read-write stores map through `MmapRaw` so concurrent readers and the
/// single writer can touch disjoint byte ranges without aliasing a Rust
/// slice. Readonly snapshots map through a plain `Mmap`.
pub struct Mapping {
    variant: MapVariant,
}

impl std::fmt::Debug for Mapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.variant {
            MapVariant::Rw(_) => f.debug_struct("Mapping").field("variant", &"Rw").finish(),
            MapVariant::Ro(_) => f.debug_struct("Mapping").field("variant", &"Ro").finish(),
        }
    }
}

enum MapVariant {
    Rw(MmapRaw),
    Ro(Mmap),
}

impl Mapping {
    fn map_rw(file: &File) -> io::Result<Self> {
        let raw = MmapRaw::map_raw(file)?;
        Ok(Self {
            variant: MapVariant::Rw(raw),
        })
    }

    fn map_ro(file: &File) -> io::Result<Self> {
        // SAFETY: the store owns the file for its lifetime. The single
        // writer only ever appends past `data_end` and advances cursors
        // with aligned 8-byte stores, so no committed byte a snapshot can
        // reach is ever rewritten under it.
        let map = unsafe { MmapOptions::new().map(file)? };
        Ok(Self {
            variant: MapVariant::Ro(map),
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        match &self.variant {
            MapVariant::Rw(m) => m.len(),
            MapVariant::Ro(m) => m.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    fn ptr(&self) -> *const u8 {
        match &self.variant {
            MapVariant::Rw(m) => m.as_mut_ptr() as *const u8,
            MapVariant::Ro(m) => m.as_ptr(),
        }
    }

    /// Borrow `[offset, offset + len)` of the mapping. Valid while this
    /// mapping is alive; the caller must not let it overlap a concurrent
    /// write of the same range (committed bytes are never rewritten, so
    /// any committed range is safe).
    pub fn read_slice(&self, offset: u64, len: usize) -> &[u8] {
        let offset = offset as usize;
        assert!(offset + len <= self.len(), "read past end of mapping");
        // SAFETY: bounds checked above; the range is never handed out as
        // a &mut, all mutation goes through raw pointers.
        unsafe { std::slice::from_raw_parts(self.ptr().add(offset), len) }
    }

    /// Copy `dst.len()` bytes out of the mapping at `offset`.
    pub fn read_into(&self, offset: u64, dst: &mut [u8]) {
        dst.copy_from_slice(self.read_slice(offset, dst.len()));
    }

    /// Fresh owned buffer copied from the mapping.
    pub fn read_bytes(&self, offset: u64, len: usize) -> Vec<u8> {
        self.read_slice(offset, len).to_vec()
    }

    /// Copy `src` into the mapping at `offset`. Writer-lock holders only;
    /// the caller guarantees the target range is not a committed byte.
    pub fn write_bytes(&self, offset: u64, src: &[u8]) {
        let raw = match &self.variant {
            MapVariant::Rw(m) => m,
            MapVariant::Ro(_) => unreachable!("write through a readonly mapping"),
        };
        let offset = offset as usize;
        assert!(offset + src.len() <= raw.len(), "write past end of mapping");
        // SAFETY: bounds checked above; the writer lock serializes all
        // writes, and readers never observe this range until the header
        // cursors are advanced after the copy.
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), raw.as_mut_ptr().add(offset), src.len());
        }
    }

    /// Aligned 8-byte load with acquire ordering. Used for the header
    /// cursors so a reader that observes an advanced cursor also observes
    /// every byte written before the advance.
    pub fn read_u64(&self, offset: u64) -> u64 {
        assert!(offset % 8 == 0 && offset as usize + 8 <= self.len());
        // SAFETY: in-bounds and 8-aligned (the mapping is page aligned),
        // so the cast target is a valid AtomicU64 location.
        let cell = unsafe { &*(self.ptr().add(offset as usize) as *const AtomicU64) };
        cell.load(Ordering::Acquire)
    }

    /// Aligned 8-byte store with release ordering. This is the commit
    /// point of every mutation.
    pub fn write_u64(&self, offset: u64, value: u64) {
        let raw = match &self.variant {
            MapVariant::Rw(m) => m,
            MapVariant::Ro(_) => unreachable!("write through a readonly mapping"),
        };
        assert!(offset % 8 == 0 && offset as usize + 8 <= raw.len());
        // SAFETY: in-bounds and 8-aligned, see read_u64.
        let cell = unsafe { &*(raw.as_mut_ptr().add(offset as usize) as *const AtomicU64) };
        cell.store(value, Ordering::Release);
    }

    /// Force mapped pages to durable storage.
    pub fn flush(&self) -> io::Result<()> {
        match &self.variant {
            MapVariant::Rw(m) => m.flush(),
            MapVariant::Ro(_) => Ok(()),
        }
    }

    pub fn flush_range(&self, offset: u64, len: usize) -> io::Result<()> {
        match &self.variant {
            MapVariant::Rw(m) => m.flush_range(offset as usize, len),
            MapVariant::Ro(_) => Ok(()),
        }
    }
}

/// Why a [`Region::grow_to`] call failed.
#[derive(Debug)]
pub enum GrowError {
    /// The file could not be extended (disk full). The previous mapping
    /// and file size are untouched; the caller may retry later.
    NoSpace(io::Error),
    /// The file grew but could not be remapped. The region keeps serving
    /// the previous mapping, but the store should stop mutating.
    Remap(io::Error),
}

/// The store file plus its current mapping.
pub struct Region {
    file: File,
    map: Arc<Mapping>,
    fail_next_grow: AtomicBool,
}

impl Region {
    /// Create (or initialize an existing empty file) at `path`, truncated
    /// to `size` bytes as a sparse file. Fails when the parent directory
    /// does not exist.
    pub fn create(path: &Path, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.set_len(size)?;
        debug!(path = %path.display(), size, "created store file");
        let map = Mapping::map_rw(&file)?;
        Ok(Self {
            file,
            map: Arc::new(map),
            fail_next_grow: AtomicBool::new(false),
        })
    }

    /// Open an existing file read-write and map it as-is.
    pub fn open_rw(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = Mapping::map_rw(&file)?;
        Ok(Self {
            file,
            map: Arc::new(map),
            fail_next_grow: AtomicBool::new(false),
        })
    }

    /// Open an existing file readonly and map it read-only.
    pub fn open_ro(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).open(path)?;
        let map = Mapping::map_ro(&file)?;
        Ok(Self {
            file,
            map: Arc::new(map),
            fail_next_grow: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn mapping(&self) -> Arc<Mapping> {
        Arc::clone(&self.map)
    }

    /// Current mapped size in bytes.
    #[inline]
    pub fn len(&self) -> u64 {
        self.map.len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Extend the sparse file to `new_size` and remap. Returns the new
    /// mapping; must complete before any further read or write returns.
    /// A no-op when the file already covers `new_size`.
    pub fn grow_to(&mut self, new_size: u64) -> Result<Arc<Mapping>, GrowError> {
        if self.fail_next_grow.swap(false, Ordering::SeqCst) {
            return Err(GrowError::NoSpace(io::Error::new(
                io::ErrorKind::Other,
                "simulated full disk on resize",
            )));
        }
        if new_size <= self.len() {
            return Ok(self.mapping());
        }
        self.file.set_len(new_size).map_err(GrowError::NoSpace)?;
        let map = Mapping::map_rw(&self.file).map_err(GrowError::Remap)?;
        debug!(new_size, "grew store file");
        self.map = Arc::new(map);
        Ok(self.mapping())
    }

    /// Arm the disk-full test hook: the next `grow_to` fails without
    /// touching the file or the mapping.
    pub fn set_fail_next_grow(&self) {
        self.fail_next_grow.store(true, Ordering::SeqCst);
    }

    pub fn flush(&self) -> io::Result<()> {
        self.map.flush()
    }
}
