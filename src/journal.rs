//! Append-only mutation journal.
//!
//! Every acknowledged mutation is written here before it is applied to the
//! in-memory collection. Opening a journal replays it; a partial trailing
//! entry (crash mid-write) is truncated, a damaged complete entry is an error.

use crate::error::{Result, StoreError};
use crate::types::{Memo, MemoId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{error, info, warn};

/// Magic bytes for journal file.
const JOURNAL_MAGIC: &[u8; 4] = b"MJL\0";

/// Current journal format version.
const JOURNAL_VERSION: u8 = 1;

/// Header length (magic + version).
const HEADER_LEN: u64 = 5;

/// Upper bound on a single encoded entry.
const MAX_ENTRY_BYTES: usize = 16 * 1024 * 1024;

/// Mutations recorded in the journal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum JournalOp {
    /// A memo was created.
    Insert(Memo),
    /// Title and content of a memo were replaced.
    Patch {
        id: MemoId,
        title: String,
        content: String,
    },
    /// A memo was deleted.
    Remove { id: MemoId },
}

/// A single journal entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JournalEntry {
    pub seq: u64,
    /// Seconds since epoch when written.
    pub timestamp: u64,
    pub op: JournalOp,
}

enum ReadOutcome {
    Entry(JournalEntry, u64),
    End,
    TornTail,
}

/// File operations the journal writes through.
pub(crate) trait JournalFile: Write + Send {
    fn set_len(&self, size: u64) -> io::Result<()>;
    fn sync_all(&self) -> io::Result<()>;
}

impl JournalFile for File {
    fn set_len(&self, size: u64) -> io::Result<()> {
        File::set_len(self, size)
    }

    fn sync_all(&self) -> io::Result<()> {
        File::sync_all(self)
    }
}

/// Mutation journal backing a persistent store.
pub struct Journal {
    path: PathBuf,
    next_seq: Mutex<u64>,
    /// Opened in append mode, so writes land at the end even after a truncate.
    file: Mutex<Box<dyn JournalFile>>,
    size: AtomicU64,
    entries: AtomicU64,
    /// Set when a failed append could not be rolled back; cleared by a rewrite.
    failed: AtomicBool,
    /// fsync after every append.
    sync_writes: bool,
}

impl Journal {
    /// Open or create a journal, returning it with the entries to replay.
    pub fn open(path: impl AsRef<Path>, sync_writes: bool) -> Result<(Self, Vec<JournalEntry>)> {
        let path = path.as_ref().to_path_buf();

        let (entries, size) = if path.exists() {
            Self::replay(&path)?
        } else {
            Self::write_fresh(&path)?;
            (Vec::new(), HEADER_LEN)
        };

        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        let file = OpenOptions::new().append(true).open(&path)?;

        let journal = Self {
            path,
            next_seq: Mutex::new(next_seq),
            file: Mutex::new(Box::new(file)),
            size: AtomicU64::new(size),
            entries: AtomicU64::new(entries.len() as u64),
            failed: AtomicBool::new(false),
            sync_writes,
        };

        Ok((journal, entries))
    }

    /// Append an operation (returns its sequence number).
    ///
    /// The entry is on disk before returning; with `sync_writes` it is also
    /// fsynced. On error the file is cut back to its last good size, so a
    /// rejected entry never reaches a later replay.
    pub fn append(&self, op: JournalOp) -> Result<u64> {
        if self.failed.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "journal has an unrecoverable partial write".into(),
            ));
        }

        let mut next_seq = self.next_seq.lock();
        let seq = *next_seq;

        let entry = JournalEntry {
            seq,
            timestamp: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            op,
        };
        let frame = Self::encode_frame(&entry)?;

        let mut file = self.file.lock();
        if let Err(e) = Self::write_frame(&mut **file, &frame, self.sync_writes) {
            let good_size = self.size();
            match file.set_len(good_size) {
                Ok(()) => warn!(seq, error = %e, "journal append failed; tail rolled back"),
                Err(undo) => {
                    self.failed.store(true, Ordering::SeqCst);
                    error!(
                        seq,
                        error = %e,
                        rollback_error = %undo,
                        "journal append failed and could not be rolled back"
                    );
                }
            }
            return Err(e.into());
        }

        *next_seq += 1;
        self.size.fetch_add(frame.len() as u64, Ordering::SeqCst);
        self.entries.fetch_add(1, Ordering::SeqCst);

        Ok(seq)
    }

    /// Replace the journal with one insert per live memo.
    ///
    /// Writes a sibling temp file and renames it over the journal. Until the
    /// rename succeeds the old journal stays in place and in use.
    pub fn rewrite<'a>(&self, memos: impl IntoIterator<Item = &'a Memo>) -> Result<()> {
        let mut next_seq = self.next_seq.lock();
        let mut file = self.file.lock();

        let tmp_path = self.path.with_extension("journal.tmp");
        let (compacted, size, count) = match Self::write_compacted(&tmp_path, memos) {
            Ok(built) => built,
            Err(e) => {
                let _ = fs::remove_file(&tmp_path);
                return Err(e);
            }
        };
        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        *file = Box::new(compacted);
        *next_seq = count + 1;
        self.size.store(size, Ordering::SeqCst);
        self.entries.store(count, Ordering::SeqCst);
        self.failed.store(false, Ordering::SeqCst);

        info!(path = %self.path.display(), entries = count, bytes = size, "journal rewritten");
        Ok(())
    }

    /// Fsync written entries.
    pub fn sync(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.flush()?;
        file.sync_all()?;
        Ok(())
    }

    /// Current file size in bytes.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::SeqCst)
    }

    /// Number of entries in the file.
    pub fn entry_count(&self) -> u64 {
        self.entries.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn replace_file(&self, file: Box<dyn JournalFile>) {
        *self.file.lock() = file;
    }

    fn write_fresh(path: &Path) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        file.write_all(JOURNAL_MAGIC)?;
        file.write_all(&[JOURNAL_VERSION])?;
        file.sync_all()?;
        Ok(())
    }

    /// Build the compacted journal at `tmp_path`. Returns an append handle
    /// to it with its size and entry count.
    fn write_compacted<'a>(
        tmp_path: &Path,
        memos: impl IntoIterator<Item = &'a Memo>,
    ) -> Result<(File, u64, u64)> {
        let mut tmp = BufWriter::new(File::create(tmp_path)?);
        tmp.write_all(JOURNAL_MAGIC)?;
        tmp.write_all(&[JOURNAL_VERSION])?;

        let mut size = HEADER_LEN;
        let mut count = 0u64;
        for memo in memos {
            count += 1;
            let entry = JournalEntry {
                seq: count,
                timestamp: memo.created_at.0.max(0) as u64 / 1_000_000,
                op: JournalOp::Insert(memo.clone()),
            };
            let frame = Self::encode_frame(&entry)?;
            tmp.write_all(&frame)?;
            size += frame.len() as u64;
        }
        tmp.flush()?;
        tmp.get_ref().sync_all()?;
        drop(tmp);

        // Opened before the rename; the handle follows the file to its new name
        let compacted = OpenOptions::new().append(true).open(tmp_path)?;
        Ok((compacted, size, count))
    }

    fn write_frame(file: &mut dyn JournalFile, frame: &[u8], sync: bool) -> io::Result<()> {
        file.write_all(frame)?;
        file.flush()?;
        if sync {
            file.sync_all()?;
        }
        Ok(())
    }

    /// Frame: u32 length, rmp body, u32 crc32 of body.
    fn encode_frame(entry: &JournalEntry) -> Result<Vec<u8>> {
        let encoded = rmp_serde::to_vec(entry)?;
        let checksum = crc32fast::hash(&encoded);

        let mut frame = Vec::with_capacity(encoded.len() + 8);
        frame.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
        frame.extend_from_slice(&encoded);
        frame.extend_from_slice(&checksum.to_le_bytes());
        Ok(frame)
    }

    /// Read every entry, truncating a torn tail in place.
    fn replay(path: &Path) -> Result<(Vec<JournalEntry>, u64)> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        let mut version = [0u8; 1];
        if reader.read_exact(&mut magic).is_err() || &magic != JOURNAL_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid journal magic".into()));
        }
        reader.read_exact(&mut version)?;
        if version[0] != JOURNAL_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported journal version: {}",
                version[0]
            )));
        }

        let mut entries = Vec::new();
        let mut offset = HEADER_LEN;
        loop {
            match Self::read_entry(&mut reader, offset, file_len)? {
                ReadOutcome::Entry(entry, len) => {
                    entries.push(entry);
                    offset += len;
                }
                ReadOutcome::End => break,
                ReadOutcome::TornTail => {
                    warn!(
                        path = %path.display(),
                        offset,
                        dropped_bytes = file_len - offset,
                        "truncating torn journal tail"
                    );
                    let file = OpenOptions::new().write(true).open(path)?;
                    file.set_len(offset)?;
                    file.sync_all()?;
                    break;
                }
            }
        }

        Ok((entries, offset))
    }

    fn read_entry<R: Read>(reader: &mut R, offset: u64, file_len: u64) -> Result<ReadOutcome> {
        if offset >= file_len {
            return Ok(ReadOutcome::End);
        }

        let mut len_bytes = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut len_bytes) {
            return Self::torn_or_err(e);
        }
        let len = u32::from_le_bytes(len_bytes) as usize;

        if len > MAX_ENTRY_BYTES {
            return Err(StoreError::Corruption(format!(
                "journal entry at offset {offset} too large ({len} bytes)"
            )));
        }

        let mut encoded = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut encoded) {
            return Self::torn_or_err(e);
        }

        let mut checksum_bytes = [0u8; 4];
        if let Err(e) = reader.read_exact(&mut checksum_bytes) {
            return Self::torn_or_err(e);
        }
        let stored = u32::from_le_bytes(checksum_bytes);

        let computed = crc32fast::hash(&encoded);
        if stored != computed {
            return Err(StoreError::Corruption(format!(
                "journal checksum mismatch at offset {offset}: \
                 expected {stored:#010x}, got {computed:#010x}"
            )));
        }

        let entry: JournalEntry = rmp_serde::from_slice(&encoded)?;
        Ok(ReadOutcome::Entry(entry, 4 + len as u64 + 4))
    }

    fn torn_or_err(e: io::Error) -> Result<ReadOutcome> {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Ok(ReadOutcome::TornTail)
        } else {
            Err(e.into())
        }
    }
}
