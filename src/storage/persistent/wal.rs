//! Write-ahead log for the durable inventory.
//!
//! Every committed unit of work is appended as a single frame, so a crash in
//! the middle of a write loses that whole commit and nothing else. Compaction
//! replaces the log with one snapshot frame via write-to-temp and rename.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [FRAME 1: codec-encoded WalEntry]
//! [FRAME 2: codec-encoded WalEntry]
//! ...
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Error as IoError, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::state::{CommitRecord, StateSnapshot};

use super::codec;

const HEADER_LEN: u64 = 5;

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// When this entry was written.
    pub written_at: DateTime<Utc>,
    /// The logged payload.
    pub kind: WalEntryKind,
}

/// Payload of a WAL entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryKind {
    /// One committed unit of work.
    Commit(CommitRecord),
    /// Full inventory state; replay starts over from here.
    Snapshot(StateSnapshot),
}

#[derive(Serialize)]
#[serde(rename_all = "snake_case")]
enum WalEntryKindRef<'a> {
    Commit(&'a CommitRecord),
    Snapshot(&'a StateSnapshot),
}

#[derive(Serialize)]
struct WalFrame<'a> {
    written_at: DateTime<Utc>,
    kind: WalEntryKindRef<'a>,
}

/// Result of reading a log from disk.
#[derive(Debug, Default)]
pub struct WalReplay {
    /// Entries decoded before the first bad frame.
    pub entries: Vec<WalEntry>,
    /// Byte length of the valid prefix of the file.
    pub valid_len: u64,
    /// Why decoding stopped early, if it did.
    pub corruption: Option<String>,
}

/// Read every decodable entry from the log at `path`.
///
/// A missing or empty file yields no entries. Decoding stops at the first
/// truncated or corrupt frame; everything before it is returned.
pub fn read_log(path: &Path) -> IoResult<WalReplay> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(WalReplay::default()),
        Err(e) => return Err(e),
    };
    let file_len = file.metadata()?.len();
    if file_len == 0 {
        return Ok(WalReplay::default());
    }

    let mut reader = BufReader::new(file);
    codec::read_header(&mut reader)?;

    let mut replay = WalReplay {
        valid_len: HEADER_LEN,
        ..WalReplay::default()
    };
    while replay.valid_len < file_len {
        match codec::decode::<WalEntry>(&mut reader) {
            Ok(entry) => {
                replay.entries.push(entry);
                replay.valid_len = reader.stream_position()?;
            }
            Err(e) => {
                replay.corruption = Some(format!(
                    "bad frame at byte {} of {file_len}: {e}",
                    replay.valid_len
                ));
                break;
            }
        }
    }
    Ok(replay)
}

/// Append-only log handle. Thread-safe via an internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<File>,
    sync_on_write: bool,
}

fn poisoned() -> IoError {
    IoError::new(ErrorKind::Other, "poisoned lock: wal.writer")
}

fn open_append(path: &Path) -> IoResult<File> {
    OpenOptions::new().append(true).open(path)
}

impl WriteAheadLog {
    /// Open a log for appending, creating it with a header if it is missing or empty.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let needs_header = match fs::metadata(path) {
            Ok(meta) => meta.len() == 0,
            Err(e) if e.kind() == ErrorKind::NotFound => true,
            Err(e) => return Err(e),
        };
        if needs_header {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(open_append(path)?),
            sync_on_write,
        })
    }

    /// Append one committed unit of work.
    pub fn append_commit(&self, record: &CommitRecord) -> IoResult<()> {
        let frame = codec::encode(&WalFrame {
            written_at: Utc::now(),
            kind: WalEntryKindRef::Commit(record),
        })?;

        let mut writer = self.writer.lock().map_err(|_| poisoned())?;
        let start = writer.metadata()?.len();
        let written = writer.write_all(&frame).and_then(|()| {
            if self.sync_on_write {
                writer.sync_all()
            } else {
                Ok(())
            }
        });
        if let Err(e) = written {
            // Cut a partial frame so later appends stay readable.
            if let Err(trunc) = writer.set_len(start) {
                tracing::warn!(error = %trunc, "failed to cut partial WAL frame");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Replace the whole log with a single snapshot entry.
    ///
    /// The new log is written to a sibling file and renamed over the old one, so
    /// a crash leaves either the old log or the new one.
    pub fn rewrite_snapshot(&self, snapshot: &StateSnapshot) -> IoResult<()> {
        let frame = codec::encode(&WalFrame {
            written_at: Utc::now(),
            kind: WalEntryKindRef::Snapshot(snapshot),
        })?;

        let mut writer = self.writer.lock().map_err(|_| poisoned())?;

        let tmp_path = self.path.with_extension("compact");
        {
            let mut tmp = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            codec::write_header(&mut tmp)?;
            tmp.write_all(&frame)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        *writer = open_append(&self.path)?;
        Ok(())
    }

    /// Current size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }
}
