//! Persistent storage backend for hostrecon.
//!
//! This module provides durable, crash-safe storage with:
//! - a write-ahead log holding one frame per committed unit of work
//! - CRC32 checksums for corruption detection
//! - snapshot compaction once the log grows past a threshold
//! - an exclusive directory lock so one process owns the data
//!
//! # Layout
//!
//! ```text
//! <data dir>/
//!   hostrecon.lock    advisory lock, held while open
//!   inventory.wal     [header][snapshot?][commit][commit]...
//! ```

mod codec;
mod file_lock;
mod store;
mod wal;

pub use file_lock::DirLock;
pub use store::PersistentInventory;
pub use wal::{read_log, WalEntry, WalEntryKind, WalReplay, WriteAheadLog};

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReconError, ReconResult, ValidationError};

/// Configuration for persistent storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistentConfig {
    /// WAL size (bytes) above which the log is compacted into a snapshot.
    pub max_wal_size: u64,
    /// Whether to fsync after every commit.
    pub sync_on_write: bool,
}

impl Default for PersistentConfig {
    fn default() -> Self {
        Self {
            max_wal_size: 64 * 1024 * 1024, // 64 MB
            sync_on_write: true,
        }
    }
}

impl PersistentConfig {
    /// Smallest accepted `max_wal_size`.
    pub const MIN_WAL_SIZE: u64 = 4 * 1024;

    /// Check the configuration.
    ///
    /// # Errors
    /// `InvalidConfig` if `max_wal_size` is below [`Self::MIN_WAL_SIZE`].
    pub fn validate(self) -> Result<Self, ValidationError> {
        if self.max_wal_size < Self::MIN_WAL_SIZE {
            return Err(ValidationError::InvalidConfig {
                reason: format!(
                    "max_wal_size must be at least {} bytes (got {})",
                    Self::MIN_WAL_SIZE,
                    self.max_wal_size
                ),
            });
        }
        Ok(self)
    }
}

/// Open or create a persistent inventory in the given directory.
///
/// # Errors
/// - the configuration is invalid
/// - the directory cannot be created, or another process holds its lock
/// - the log holds commits that cannot be replayed
///
/// # Example
/// ```rust,ignore
/// use std::sync::Arc;
/// use hostrecon::storage::persistent::open_inventory;
///
/// let store = open_inventory("./inventory", None)?;
/// let engine = InventoryEngine::new(Arc::new(store), EngineConfig::default())?;
/// ```
pub fn open_inventory(
    path: impl AsRef<Path>,
    config: Option<PersistentConfig>,
) -> ReconResult<PersistentInventory> {
    let cfg = config.unwrap_or_default().validate()?;
    PersistentInventory::open(path.as_ref(), cfg).map_err(ReconError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_tiny_wal() {
        let cfg = PersistentConfig {
            max_wal_size: 512,
            sync_on_write: false,
        };
        assert!(matches!(
            cfg.validate(),
            Err(ValidationError::InvalidConfig { .. })
        ));
        assert!(PersistentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_from_partial_json() {
        let cfg: PersistentConfig = serde_json::from_str(r#"{"sync_on_write": false}"#).unwrap();
        assert!(!cfg.sync_on_write);
        assert_eq!(cfg.max_wal_size, PersistentConfig::default().max_wal_size);
    }
}
