//! Abstract storage traits for hostrecon.
//!
//! These traits define the transactional contract the reconciliation engine
//! needs from a durable store:
//! - `InventoryStore::begin` opens a unit of work scoped to one submission
//! - reads inside a unit see the unit's own staged writes
//! - `UnitOfWork::commit` applies every staged write atomically, or none
//! - uniqueness of host address and of `(hostname, domain name)` is enforced
//!   by the store, not by callers

use thiserror::Error;

use crate::domain_asset::{AssetKey, DomainAsset, DomainAssetId};
use crate::host::{Host, HostId};
use crate::ids::{Sequence, UserId};
use crate::owner::User;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Host not found.
    #[error("Host not found: {0}")]
    HostNotFound(HostId),

    /// Domain asset not found.
    #[error("Domain asset not found: {0}")]
    DomainAssetNotFound(DomainAssetId),

    /// Unique key already taken.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The row changed since it was read.
    #[error("Version conflict on {entity}: expected version {expected}, stored version {stored}")]
    VersionConflict {
        /// Entity description.
        entity: String,
        /// Version the writer expected to replace.
        expected: u64,
        /// Version currently stored.
        stored: u64,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// I/O failure in a durable backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A consistent read of the whole inventory.
#[derive(Debug, Clone, Default)]
pub struct InventorySnapshot {
    /// Hosts ordered by id.
    pub hosts: Vec<Host>,
    /// Domain assets ordered by id.
    pub domain_assets: Vec<DomainAsset>,
    /// Users ordered by id.
    pub users: Vec<User>,
    /// Sequence of the last commit included in this snapshot.
    pub commit_sequence: u64,
}

/// One transactional unit of work.
///
/// A unit holds exclusive write access to the store until it is committed or
/// dropped. Dropping a unit without committing discards every staged write.
pub trait UnitOfWork {
    /// Get a host by id.
    fn host(&self, id: HostId) -> Result<Option<Host>, StorageError>;

    /// Find the host with exactly this address.
    fn host_by_address(&self, address: &str) -> Result<Option<Host>, StorageError>;

    /// Find the domain asset with exactly this identity key.
    fn domain_asset_by_key(&self, key: &AssetKey) -> Result<Option<DomainAsset>, StorageError>;

    /// All domain assets currently linked to a host, ordered by id.
    fn domain_assets_for_host(&self, host_id: HostId) -> Result<Vec<DomainAsset>, StorageError>;

    /// Get a user by id.
    fn user(&self, id: UserId) -> Result<Option<User>, StorageError>;

    /// Find a user by exact username.
    fn user_by_name(&self, username: &str) -> Result<Option<User>, StorageError>;

    /// Allocate the next id from a sequence. Allocations are discarded with the unit.
    fn allocate_id(&mut self, sequence: Sequence) -> u64;

    /// Insert a new host. Fails with `DuplicateKey` if the id or address is taken.
    fn insert_host(&mut self, host: Host) -> Result<(), StorageError>;

    /// Replace a stored host.
    ///
    /// `host.version` must be exactly one more than the stored version, otherwise
    /// the write fails with `VersionConflict`.
    fn update_host(&mut self, host: Host) -> Result<(), StorageError>;

    /// Insert a new domain asset. A set `host_id` must reference a stored host.
    fn insert_domain_asset(&mut self, asset: DomainAsset) -> Result<(), StorageError>;

    /// Replace a stored domain asset, with the same version rule as `update_host`.
    fn update_domain_asset(&mut self, asset: DomainAsset) -> Result<(), StorageError>;

    /// Insert a user. Fails with `DuplicateKey` if the username is taken.
    fn insert_user(&mut self, user: User) -> Result<(), StorageError>;

    /// Remove every host and its services, unlinking all domain assets.
    /// Returns the number of removed hosts.
    fn clear_hosts(&mut self) -> Result<usize, StorageError>;

    /// Atomically apply all staged writes and return the commit sequence.
    ///
    /// `on_commit` receives the sequence once the commit has succeeded and
    /// before exclusive access is released, so whatever it does happens in
    /// commit order. It is not called when the commit fails. A unit with no
    /// writes commits nothing and passes the current sequence.
    fn commit_with(self: Box<Self>, on_commit: &mut dyn FnMut(u64)) -> Result<u64, StorageError>;

    /// [`commit_with`](Self::commit_with) without a hook.
    fn commit(self: Box<Self>) -> Result<u64, StorageError> {
        self.commit_with(&mut |_| {})
    }
}

/// A transactional inventory store.
pub trait InventoryStore: Send + Sync {
    /// Open a unit of work. Blocks while another unit is open.
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError>;

    /// Read a consistent snapshot of the inventory.
    fn snapshot(&self) -> Result<InventorySnapshot, StorageError>;
}
