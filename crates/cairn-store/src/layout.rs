//! # Layout detection and migration
//!
//! A store path can be a single merged file, a folder holding a merged
//! `data.bin`, or a legacy folder with separate `data.bin` and
//! `index.bin` files. Legacy folders are converted on first read-write
//! open: entries are streamed into a fresh merged file beside the old
//! one, which is then renamed over `data.bin` and the legacy `index.bin`
//! deleted. A crash mid-conversion leaves either the old pair or the
//! finished merged file, never neither.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::info;

use cairn_core::geometry::MAGIC;
use cairn_core::{Result, StoreError};

use crate::store::{DiskStore, StoreOptions};

pub const DATA_FILE_NAME: &str = "data.bin";
pub const INDEX_FILE_NAME: &str = "index.bin";
const MERGE_FILE_NAME: &str = "data.bin.merge";

/// What lives at a store path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreLayout {
    /// A merged store file (current format).
    SingleFile,
    /// A folder whose `data.bin` is a merged store file.
    FolderWithMergedDataAndIndexFile,
    /// A legacy folder with separate `data.bin` and `index.bin`.
    FolderWithStandaloneDataAndIndexFiles,
    /// Nothing here yet (or an empty file/folder); a fresh store will be
    /// created.
    NewlyCreated,
    /// An existing file or folder that is not a store.
    Invalid,
}

/// `<path><suffix>`, e.g. `data.bin` -> `data.bin.log`.
pub(crate) fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

fn has_magic(path: &Path) -> io::Result<bool> {
    let mut file = File::open(path)?;
    let mut prefix = [0u8; 8];
    match file.read_exact(&mut prefix) {
        Ok(()) => Ok(prefix == MAGIC),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Classify the target path without opening a store.
pub fn detect(path: &Path) -> Result<StoreLayout> {
    let meta = match fs::metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(StoreLayout::NewlyCreated),
        Err(e) => return Err(e.into()),
    };

    if meta.is_file() {
        if meta.len() == 0 {
            return Ok(StoreLayout::NewlyCreated);
        }
        return Ok(if has_magic(path)? {
            StoreLayout::SingleFile
        } else {
            StoreLayout::Invalid
        });
    }

    let data = path.join(DATA_FILE_NAME);
    let index = path.join(INDEX_FILE_NAME);
    if data.is_file() && index.is_file() {
        return Ok(StoreLayout::FolderWithStandaloneDataAndIndexFiles);
    }
    if data.is_file() {
        return Ok(if has_magic(&data)? {
            StoreLayout::FolderWithMergedDataAndIndexFile
        } else {
            StoreLayout::Invalid
        });
    }
    if index.is_file() {
        return Ok(StoreLayout::Invalid);
    }
    if fs::read_dir(path)?.next().is_none() {
        return Ok(StoreLayout::NewlyCreated);
    }
    Ok(StoreLayout::Invalid)
}

/// Legacy `index.bin`: a packed sequence of
/// `key_len u16, key bytes, offset u64, length u64` entries.
fn parse_legacy_index(bytes: &[u8]) -> Result<Vec<(String, u64, u64)>> {
    let malformed = || StoreError::LayoutConflict("legacy index.bin is malformed".to_string());
    let mut entries = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        if bytes.len() - pos < 2 {
            return Err(malformed());
        }
        let key_len = u16::from_le_bytes([bytes[pos], bytes[pos + 1]]) as usize;
        pos += 2;
        if key_len == 0 || bytes.len() - pos < key_len + 16 {
            return Err(malformed());
        }
        let key = std::str::from_utf8(&bytes[pos..pos + key_len])
            .map_err(|_| malformed())?
            .to_string();
        pos += key_len;
        let offset = u64::from_le_bytes(bytes[pos..pos + 8].try_into().unwrap());
        let length = u64::from_le_bytes(bytes[pos + 8..pos + 16].try_into().unwrap());
        pos += 16;
        entries.push((key, offset, length));
    }
    Ok(entries)
}

/// One-time destructive conversion of a legacy folder store.
pub(crate) fn migrate_legacy_folder(dir: &Path, options: &StoreOptions) -> Result<()> {
    let data_path = dir.join(DATA_FILE_NAME);
    let index_path = dir.join(INDEX_FILE_NAME);
    info!(dir = %dir.display(), "converting legacy folder store");

    let entries = parse_legacy_index(&fs::read(&index_path)?)?;
    let mut legacy = File::open(&data_path)?;
    let legacy_len = legacy.metadata()?.len();

    let merge_path = dir.join(MERGE_FILE_NAME);
    if merge_path.exists() {
        // Leftover from a conversion that crashed before the rename.
        fs::remove_file(&merge_path)?;
    }

    let store = DiskStore::open_with(&merge_path, options.clone())?;
    for (key, offset, length) in &entries {
        if offset.checked_add(*length).map_or(true, |end| end > legacy_len) {
            return Err(StoreError::CorruptStore(format!(
                "legacy index references [{offset}, {offset}+{length}) past data.bin ({legacy_len} bytes)"
            )));
        }
        let mut buf = vec![0u8; *length as usize];
        legacy.seek(SeekFrom::Start(*offset))?;
        legacy.read_exact(&mut buf)?;
        store.add(key, &buf)?;
    }
    store.close()?;

    let _ = fs::remove_file(sibling(&merge_path, ".log"));
    let _ = fs::remove_file(sibling(&merge_path, ".lock"));
    fs::rename(&merge_path, &data_path)?;
    fs::remove_file(&index_path)?;
    info!(entries = entries.len(), "legacy store converted");
    Ok(())
}
