//! # Side journal
//!
//! A side file at `<data>.log` holding one fixed-size intent record per
//! mutation: the header cursors before the mutation and the cursors it
//! will commit. The journal exists only for recovery. The commit ordering
//! (payload, index record, journal record, header advance) already makes
//! a crash at any point leave the header pointing at a consistent prefix;
//! the journal covers the remaining case of a torn header pair, rolling
//! both cursors back to the pre-mutation state.
//!
//! The file is truncated to zero on clean close and after a successful
//! flush, so its size is bounded by the mutations of one session.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::warn;

use cairn_core::record::{JournalRecord, JOURNAL_RECORD_SIZE};

/// Writer side of the journal. Only the read-write store holds one.
pub struct Journal {
    file: File,
}

impl Journal {
    /// Open or create the journal file. The caller is expected to
    /// truncate after recovery before appending new intents.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self { file })
    }

    /// Append one intent record. Called before the header cursors are
    /// advanced for the mutation it describes.
    pub fn append(&mut self, record: &JournalRecord) -> io::Result<()> {
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_all(&record.encode())
    }

    /// Drop all history. Called on clean close and after a flush.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_data()
    }
}

/// Read the journal at `path` and return the most recent intact intent
/// record, if any. A missing or empty journal (the clean-close state)
/// yields `None`. A torn trailing record is ignored; garbage mid-file
/// stops the scan at the last record that still checks out.
pub fn last_intent(path: &Path) -> io::Result<Option<JournalRecord>> {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut last = None;
    for frame in bytes.chunks(JOURNAL_RECORD_SIZE) {
        match JournalRecord::decode(frame) {
            Some(rec) => last = Some(rec),
            None => break,
        }
    }
    Ok(last)
}

/// Resolve the header cursors against the last journal intent.
///
/// The header is consistent when it matches the record's post pair (the
/// mutation committed) or its pre pair (the mutation never reached the
/// header). Anything else is a torn pair; both cursors roll back to the
/// pre-mutation state, the most recent consistent pair on disk.
pub fn effective_cursors(
    intent: &JournalRecord,
    data_end: u64,
    index_head: u64,
) -> (u64, u64, bool) {
    let observed = (data_end, index_head);
    if observed == (intent.post_data_end, intent.post_index_head)
        || observed == (intent.pre_data_end, intent.pre_index_head)
    {
        return (data_end, index_head, false);
    }
    warn!(
        data_end,
        index_head,
        pre_data_end = intent.pre_data_end,
        pre_index_head = intent.pre_index_head,
        "torn header cursors, rolling back to pre-mutation state"
    );
    (intent.pre_data_end, intent.pre_index_head, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_core::record::JOURNAL_OP_ADD;
    use tempfile::tempdir;

    fn record(pre: (u64, u64), post: (u64, u64)) -> JournalRecord {
        JournalRecord {
            op: JOURNAL_OP_ADD,
            key_hash: JournalRecord::key_hash_of("k"),
            pre_data_end: pre.0,
            pre_index_head: pre.1,
            post_data_end: post.0,
            post_index_head: post.1,
        }
    }

    #[test]
    fn test_missing_journal_is_clean() {
        let dir = tempdir().unwrap();
        assert_eq!(last_intent(&dir.path().join("absent.log")).unwrap(), None);
    }

    #[test]
    fn test_last_intent_returns_newest_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.log");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&record((100, 64), (150, 90))).unwrap();
        journal.append(&record((150, 90), (200, 120))).unwrap();

        let last = last_intent(&path).unwrap().unwrap();
        assert_eq!(last.post_data_end, 200);
    }

    #[test]
    fn test_torn_tail_record_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.log");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&record((100, 64), (150, 90))).unwrap();
        // Simulate a crash mid-append of the next record.
        let bytes = record((150, 90), (999, 999)).encode();
        journal.file.seek(SeekFrom::End(0)).unwrap();
        journal.file.write_all(&bytes[..20]).unwrap();

        let last = last_intent(&path).unwrap().unwrap();
        assert_eq!(last.post_data_end, 150);
    }

    #[test]
    fn test_truncate_forgets_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j.log");
        let mut journal = Journal::open(&path).unwrap();
        journal.append(&record((1, 2), (3, 4))).unwrap();
        journal.truncate().unwrap();
        assert_eq!(last_intent(&path).unwrap(), None);
    }

    #[test]
    fn test_effective_cursors_accepts_pre_and_post() {
        let rec = record((100, 64), (150, 90));
        assert_eq!(effective_cursors(&rec, 150, 90), (150, 90, false));
        assert_eq!(effective_cursors(&rec, 100, 64), (100, 64, false));
    }

    #[test]
    fn test_effective_cursors_rolls_back_torn_pair() {
        let rec = record((100, 64), (150, 90));
        // data_end advanced but index_head did not: torn.
        assert_eq!(effective_cursors(&rec, 150, 64), (100, 64, true));
    }
}
