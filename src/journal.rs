//! Append-only file journal of fractional ledger events.
//!
//! Each record is a little-endian `u64` length followed by the bincode
//! encoding of a [`JournalEntry`]. A record is written with a single call,
//! and a failed write is cut back off the file. Opening a journal drops a
//! torn tail left by a crash mid-record, so appends after recovery stay
//! readable.

use crate::clock::{Clock, SystemClock};
use crate::error::StorageError;
use crate::events::{EventSink, FractionEvent};
use crate::objects::Timestamp;
use anyhow::Context;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Upper bound on one encoded entry; events are a few hundred bytes
const MAX_RECORD_LEN: u64 = 1 << 20;

const LEN_PREFIX: u64 = 8;

/// One journaled event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Position in the journal, starting at 0
    pub sequence: u64,
    pub recorded_at: Timestamp,
    pub event: FractionEvent,
}

struct JournalWriter {
    file: File,
    next_sequence: u64,
}

/// Event sink that appends every event to a file
pub struct FileEventJournal {
    path: PathBuf,
    writer: Mutex<JournalWriter>,
    clock: Arc<dyn Clock>,
}

impl FileEventJournal {
    /// Open (or create) the journal at `path`, continuing its sequence
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock<P: AsRef<Path>>(
        path: P,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(&path)
            .with_context(|| format!("failed to open journal {}", path.display()))?;

        let next_sequence = recover_tail(&path, &file)?;

        Ok(Self {
            path,
            writer: Mutex::new(JournalWriter {
                file,
                next_sequence,
            }),
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event and return the entry that was written
    pub fn append(&self, event: &FractionEvent) -> Result<JournalEntry, StorageError> {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = JournalEntry {
            sequence: writer.next_sequence,
            recorded_at: self.clock.now(),
            event: event.clone(),
        };
        let serialized = bincode::serialize(&entry)?;

        let mut record = Vec::with_capacity(LEN_PREFIX as usize + serialized.len());
        record.extend_from_slice(&(serialized.len() as u64).to_le_bytes());
        record.extend_from_slice(&serialized);
        write_record(&mut writer.file, &record)?;

        writer.next_sequence += 1;
        Ok(entry)
    }

    /// Iterate over every entry currently in the journal
    pub fn iterate_entries(
        &self,
    ) -> Result<impl Iterator<Item = Result<JournalEntry, StorageError>>, StorageError> {
        read_entries(&self.path)
    }

    /// Read the whole journal, failing on the first damaged record
    pub fn entries(&self) -> Result<Vec<JournalEntry>, StorageError> {
        self.iterate_entries()?.collect()
    }
}

impl EventSink for FileEventJournal {
    fn publish(&self, event: &FractionEvent) {
        if let Err(err) = self.append(event) {
            warn!(
                "failed to journal {:?} to {}: {}",
                event,
                self.path.display(),
                err
            );
        }
    }
}

/// File the journal appends records to
trait RecordFile: Write {
    fn size(&self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl RecordFile for File {
    fn size(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write a whole record, or cut the file back to where it was on failure
fn write_record<F: RecordFile>(file: &mut F, record: &[u8]) -> Result<(), StorageError> {
    let start = file.size()?;
    if let Err(err) = file.write_all(record).and_then(|_| file.flush()) {
        if let Err(trim_err) = file.truncate(start) {
            warn!(
                "failed to trim partial journal record back to {} bytes: {}",
                start, trim_err
            );
        }
        return Err(StorageError::Journal(format!(
            "failed to append record: {}",
            err
        )));
    }
    Ok(())
}

/// Scan the journal, dropping a torn tail, and return the next sequence
fn recover_tail(path: &Path, file: &File) -> Result<u64, StorageError> {
    let mut records = read_entries(path)?;
    let mut next_sequence = 0;
    loop {
        match records.next_record() {
            Ok(Some(entry)) => next_sequence = entry.sequence + 1,
            Ok(None) => return Ok(next_sequence),
            Err(RecordError::Torn(reason)) => {
                warn!(
                    "dropping torn tail of journal {} after {} bytes: {}",
                    path.display(),
                    records.offset,
                    reason
                );
                file.set_len(records.offset)?;
                file.sync_data()?;
                return Ok(next_sequence);
            }
            Err(RecordError::Corrupt(err)) => return Err(err),
        }
    }
}

fn read_entries(path: &Path) -> Result<JournalEntryIterator, StorageError> {
    let file = File::open(path)
        .with_context(|| format!("failed to read journal {}", path.display()))?;
    Ok(JournalEntryIterator {
        reader: BufReader::new(file),
        offset: 0,
        done: false,
    })
}

enum RecordError {
    /// The file ends partway through a record
    Torn(String),
    Corrupt(StorageError),
}

impl From<RecordError> for StorageError {
    fn from(err: RecordError) -> Self {
        match err {
            RecordError::Torn(reason) => {
                StorageError::Journal(format!("truncated record: {}", reason))
            }
            RecordError::Corrupt(err) => err,
        }
    }
}

struct JournalEntryIterator {
    reader: BufReader<File>,
    /// End of the last complete record
    offset: u64,
    done: bool,
}

impl JournalEntryIterator {
    fn next_record(&mut self) -> Result<Option<JournalEntry>, RecordError> {
        let mut len_buf = [0u8; LEN_PREFIX as usize];
        let read = read_full(&mut self.reader, &mut len_buf)
            .map_err(|e| RecordError::Corrupt(e.into()))?;
        if read == 0 {
            return Ok(None);
        }
        if read < len_buf.len() {
            return Err(RecordError::Torn(format!(
                "{} byte length prefix at offset {}",
                read, self.offset
            )));
        }

        let entry_len = u64::from_le_bytes(len_buf);
        let body_start = self.offset + LEN_PREFIX;
        let file_len = self
            .reader
            .get_ref()
            .metadata()
            .map_err(|e| RecordError::Corrupt(e.into()))?
            .len();
        let available = file_len.saturating_sub(body_start);
        if entry_len > available {
            return Err(RecordError::Torn(format!(
                "record at offset {} claims {} bytes but {} remain",
                self.offset, entry_len, available
            )));
        }
        if entry_len > MAX_RECORD_LEN {
            return Err(RecordError::Corrupt(StorageError::Journal(format!(
                "record at offset {} claims {} bytes, limit is {}",
                self.offset, entry_len, MAX_RECORD_LEN
            ))));
        }

        let mut entry_data = vec![0u8; entry_len as usize];
        self.reader
            .read_exact(&mut entry_data)
            .map_err(|e| RecordError::Corrupt(e.into()))?;
        let entry = bincode::deserialize(&entry_data)
            .map_err(|e| RecordError::Corrupt(StorageError::from(e)))?;

        self.offset = body_start + entry_len;
        Ok(Some(entry))
    }
}

impl Iterator for JournalEntryIterator {
    type Item = Result<JournalEntry, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(err) => {
                // Nothing after a damaged record can be framed
                self.done = true;
                Some(Err(err.into()))
            }
        }
    }
}

/// Fill `buf` as far as the reader allows, returning the bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
