//! Durable inventory backed by the write-ahead log.
//!
//! Reads are served from the in-memory state. A commit is written to the WAL
//! before it becomes visible; when the WAL outgrows `max_wal_size` it is
//! compacted into a snapshot.

use std::fs;
use std::path::Path;
use std::sync::RwLock;

use crate::storage::state::{CommitRecord, CommitSink, InventoryState, StagedUnit};
use crate::storage::traits::{InventorySnapshot, InventoryStore, StorageError, UnitOfWork};

use super::file_lock::DirLock;
use super::wal::{read_log, WalEntryKind, WriteAheadLog};
use super::PersistentConfig;

const WAL_FILE: &str = "inventory.wal";

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

struct WalSink {
    wal: WriteAheadLog,
    max_wal_size: u64,
}

impl CommitSink for WalSink {
    fn persist(&self, record: &CommitRecord, after: &InventoryState) -> Result<(), StorageError> {
        self.wal.append_commit(record)?;

        // The commit is durable at this point; a failed compaction only delays it.
        match self.wal.size_bytes() {
            Ok(size) if size > self.max_wal_size => {
                if let Err(e) = self.wal.rewrite_snapshot(&after.to_snapshot()) {
                    tracing::warn!(error = %e, wal_bytes = size, "WAL compaction failed");
                } else {
                    tracing::info!(
                        wal_bytes = size,
                        commit_sequence = record.sequence,
                        "WAL compacted into snapshot"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "could not stat WAL"),
        }
        Ok(())
    }
}

/// Inventory persisted to a data directory.
pub struct PersistentInventory {
    state: RwLock<InventoryState>,
    sink: WalSink,
    _lock: DirLock,
}

impl PersistentInventory {
    /// Open (or create) the inventory in `dir`, replaying its WAL.
    ///
    /// A torn or corrupt tail is cut off after the last whole commit.
    ///
    /// # Errors
    /// - the directory cannot be created or locked
    /// - a decoded commit cannot be applied to the replayed state
    pub fn open(dir: &Path, config: PersistentConfig) -> Result<Self, StorageError> {
        fs::create_dir_all(dir)?;
        let lock = DirLock::acquire(dir)?;
        let wal_path = dir.join(WAL_FILE);

        let replay = read_log(&wal_path)?;
        let mut state = InventoryState::default();
        let entries = replay.entries.len();
        for entry in replay.entries {
            match entry.kind {
                WalEntryKind::Snapshot(snapshot) => {
                    state = InventoryState::from_snapshot(snapshot)?;
                }
                WalEntryKind::Commit(record) => state.replay(&record)?,
            }
        }

        if let Some(reason) = replay.corruption {
            tracing::warn!(
                path = %wal_path.display(),
                %reason,
                kept_bytes = replay.valid_len,
                "discarding unreadable WAL tail"
            );
            let file = fs::OpenOptions::new().write(true).open(&wal_path)?;
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }

        let wal = WriteAheadLog::open(&wal_path, config.sync_on_write)?;
        tracing::info!(
            path = %wal_path.display(),
            entries,
            commit_sequence = state.commit_sequence(),
            "inventory opened"
        );

        Ok(Self {
            state: RwLock::new(state),
            sink: WalSink {
                wal,
                max_wal_size: config.max_wal_size,
            },
            _lock: lock,
        })
    }
}

impl InventoryStore for PersistentInventory {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError> {
        let guard = self.state.write().map_err(|_| lock_err("inventory.begin"))?;
        Ok(Box::new(StagedUnit::new(guard, &self.sink)))
    }

    fn snapshot(&self) -> Result<InventorySnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("inventory.snapshot"))?;
        Ok(state.inventory())
    }
}
