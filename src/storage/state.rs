//! Inventory state shared by the storage backends.
//!
//! Both backends keep the full inventory in memory. A unit of work applies its
//! mutations in place under the write lock, recording each one in a journal
//! together with the row images needed to undo it. On commit the journal goes
//! to a [`CommitSink`]; a failed commit or a dropped unit replays the undo log
//! backwards. The durable backend replays the same journal through
//! [`InventoryState::apply`].

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLockWriteGuard;

use serde::{Deserialize, Serialize};

use crate::domain_asset::{AssetKey, DomainAsset, DomainAssetId};
use crate::host::{Host, HostId};
use crate::ids::{Sequence, UserId};
use crate::owner::User;
use crate::storage::traits::{InventorySnapshot, StorageError, UnitOfWork};

/// Last value handed out by each id sequence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequences {
    /// Host ids.
    pub host: u64,
    /// Service ids.
    pub service: u64,
    /// Domain asset ids.
    pub domain_asset: u64,
    /// User ids.
    pub user: u64,
}

impl Sequences {
    fn next(&mut self, sequence: Sequence) -> u64 {
        let slot = match sequence {
            Sequence::Host => &mut self.host,
            Sequence::Service => &mut self.service,
            Sequence::DomainAsset => &mut self.domain_asset,
            Sequence::User => &mut self.user,
        };
        *slot += 1;
        *slot
    }
}

/// A single write recorded by a unit of work.
#[allow(missing_docs)]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Mutation {
    HostInserted(Host),
    HostUpdated(Host),
    DomainAssetInserted(DomainAsset),
    DomainAssetUpdated(DomainAsset),
    UserInserted(User),
    HostsCleared,
}

/// Everything one commit changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Commit sequence assigned to this unit.
    pub sequence: u64,
    /// Id sequences after the unit.
    pub sequences: Sequences,
    /// Writes in the order they were staged.
    pub mutations: Vec<Mutation>,
}

/// Row images that reverse one applied mutation.
#[derive(Debug)]
enum Undo {
    RemoveHost(HostId),
    RestoreHost(Host),
    RemoveAsset(DomainAssetId),
    RestoreAsset(DomainAsset),
    RemoveUser(UserId),
    RestoreHosts {
        hosts: BTreeMap<HostId, Host>,
        linked: Vec<DomainAsset>,
    },
}

/// Serializable full copy of the inventory, used for WAL compaction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Sequence of the last commit folded into the snapshot.
    pub commit_sequence: u64,
    /// Id sequences.
    pub sequences: Sequences,
    /// Hosts.
    pub hosts: Vec<Host>,
    /// Domain assets.
    pub domain_assets: Vec<DomainAsset>,
    /// Users.
    pub users: Vec<User>,
}

/// Receives each commit before it becomes visible.
pub(crate) trait CommitSink: Send + Sync {
    /// Persist `record`. `after` is the state the commit produces.
    fn persist(&self, record: &CommitRecord, after: &InventoryState) -> Result<(), StorageError>;
}

/// Sink for backends without durability.
#[derive(Debug, Default)]
pub(crate) struct DiscardSink;

impl CommitSink for DiscardSink {
    fn persist(&self, _record: &CommitRecord, _after: &InventoryState) -> Result<(), StorageError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct InventoryState {
    hosts: BTreeMap<HostId, Host>,
    by_address: HashMap<String, HostId>,
    assets: BTreeMap<DomainAssetId, DomainAsset>,
    by_asset_key: HashMap<AssetKey, DomainAssetId>,
    users: BTreeMap<UserId, User>,
    by_username: HashMap<String, UserId>,
    sequences: Sequences,
    commit_sequence: u64,
}

fn check_next_version(entity: String, stored: u64, new: u64) -> Result<(), StorageError> {
    if new == stored + 1 {
        Ok(())
    } else {
        Err(StorageError::VersionConflict {
            entity,
            expected: new.saturating_sub(1),
            stored,
        })
    }
}

impl InventoryState {
    pub(crate) const fn commit_sequence(&self) -> u64 {
        self.commit_sequence
    }

    /// Apply one mutation, enforcing keys, row versions and host links.
    pub(crate) fn apply(&mut self, mutation: &Mutation) -> Result<(), StorageError> {
        match mutation {
            Mutation::HostInserted(host) => {
                if self.hosts.contains_key(&host.id) {
                    return Err(StorageError::DuplicateKey(format!("host id {}", host.id)));
                }
                if self.by_address.contains_key(&host.address) {
                    return Err(StorageError::DuplicateKey(format!(
                        "host address {}",
                        host.address
                    )));
                }
                self.by_address.insert(host.address.clone(), host.id);
                self.hosts.insert(host.id, host.clone());
            }
            Mutation::HostUpdated(host) => {
                let prev = self
                    .hosts
                    .get(&host.id)
                    .ok_or(StorageError::HostNotFound(host.id))?;
                check_next_version(format!("host {}", host.id), prev.version, host.version)?;
                if prev.address != host.address {
                    if self.by_address.contains_key(&host.address) {
                        return Err(StorageError::DuplicateKey(format!(
                            "host address {}",
                            host.address
                        )));
                    }
                    let old = prev.address.clone();
                    self.by_address.remove(&old);
                    self.by_address.insert(host.address.clone(), host.id);
                }
                self.hosts.insert(host.id, host.clone());
            }
            Mutation::DomainAssetInserted(asset) => {
                if self.assets.contains_key(&asset.id) {
                    return Err(StorageError::DuplicateKey(format!(
                        "domain asset id {}",
                        asset.id
                    )));
                }
                let key = asset.key();
                if self.by_asset_key.contains_key(&key) {
                    return Err(StorageError::DuplicateKey(format!(
                        "domain asset {}@{}",
                        key.hostname,
                        key.domain_name.as_deref().unwrap_or("")
                    )));
                }
                self.ensure_host_link(asset)?;
                self.by_asset_key.insert(key, asset.id);
                self.assets.insert(asset.id, asset.clone());
            }
            Mutation::DomainAssetUpdated(asset) => {
                let prev = self
                    .assets
                    .get(&asset.id)
                    .ok_or(StorageError::DomainAssetNotFound(asset.id))?;
                check_next_version(format!("domain asset {}", asset.id), prev.version, asset.version)?;
                self.ensure_host_link(asset)?;
                let (old_key, new_key) = (prev.key(), asset.key());
                if old_key != new_key {
                    if self.by_asset_key.contains_key(&new_key) {
                        return Err(StorageError::DuplicateKey(format!(
                            "domain asset {}@{}",
                            new_key.hostname,
                            new_key.domain_name.as_deref().unwrap_or("")
                        )));
                    }
                    self.by_asset_key.remove(&old_key);
                    self.by_asset_key.insert(new_key, asset.id);
                }
                self.assets.insert(asset.id, asset.clone());
            }
            Mutation::UserInserted(user) => {
                if self.users.contains_key(&user.id) || self.by_username.contains_key(&user.username) {
                    return Err(StorageError::DuplicateKey(format!("user {}", user.username)));
                }
                self.by_username.insert(user.username.clone(), user.id);
                self.users.insert(user.id, user.clone());
            }
            Mutation::HostsCleared => {
                self.hosts.clear();
                self.by_address.clear();
                for asset in self.assets.values_mut() {
                    if asset.host_id.take().is_some() {
                        asset.version += 1;
                    }
                }
            }
        }
        Ok(())
    }

    /// Undo entry for `mutation`, captured before it is applied.
    ///
    /// `apply` checks everything before it writes, so a mutation that fails
    /// leaves nothing to undo.
    fn undo_for(&self, mutation: &Mutation) -> Option<Undo> {
        match mutation {
            Mutation::HostInserted(host) => Some(Undo::RemoveHost(host.id)),
            Mutation::HostUpdated(host) => self.hosts.get(&host.id).cloned().map(Undo::RestoreHost),
            Mutation::DomainAssetInserted(asset) => Some(Undo::RemoveAsset(asset.id)),
            Mutation::DomainAssetUpdated(asset) => {
                self.assets.get(&asset.id).cloned().map(Undo::RestoreAsset)
            }
            Mutation::UserInserted(user) => Some(Undo::RemoveUser(user.id)),
            Mutation::HostsCleared => Some(Undo::RestoreHosts {
                hosts: self.hosts.clone(),
                linked: self
                    .assets
                    .values()
                    .filter(|a| a.host_id.is_some())
                    .cloned()
                    .collect(),
            }),
        }
    }

    fn restore_host(&mut self, prev: Host) {
        if let Some(current) = self.hosts.get(&prev.id) {
            if current.address != prev.address {
                let stale = current.address.clone();
                self.by_address.remove(&stale);
            }
        }
        self.by_address.insert(prev.address.clone(), prev.id);
        self.hosts.insert(prev.id, prev);
    }

    fn restore_asset(&mut self, prev: DomainAsset) {
        if let Some(current) = self.assets.get(&prev.id) {
            let stale = current.key();
            if stale != prev.key() {
                self.by_asset_key.remove(&stale);
            }
        }
        self.by_asset_key.insert(prev.key(), prev.id);
        self.assets.insert(prev.id, prev);
    }

    fn revert(&mut self, undo: Undo) {
        match undo {
            Undo::RemoveHost(id) => {
                if let Some(host) = self.hosts.remove(&id) {
                    self.by_address.remove(&host.address);
                }
            }
            Undo::RestoreHost(prev) => self.restore_host(prev),
            Undo::RemoveAsset(id) => {
                if let Some(asset) = self.assets.remove(&id) {
                    self.by_asset_key.remove(&asset.key());
                }
            }
            Undo::RestoreAsset(prev) => self.restore_asset(prev),
            Undo::RemoveUser(id) => {
                if let Some(user) = self.users.remove(&id) {
                    self.by_username.remove(&user.username);
                }
            }
            Undo::RestoreHosts { hosts, linked } => {
                self.by_address = hosts.values().map(|h| (h.address.clone(), h.id)).collect();
                self.hosts = hosts;
                for asset in linked {
                    self.restore_asset(asset);
                }
            }
        }
    }

    fn ensure_host_link(&self, asset: &DomainAsset) -> Result<(), StorageError> {
        match asset.host_id {
            Some(host_id) if !self.hosts.contains_key(&host_id) => {
                Err(StorageError::HostNotFound(host_id))
            }
            _ => Ok(()),
        }
    }

    /// Replay a committed record (recovery path).
    pub(crate) fn replay(&mut self, record: &CommitRecord) -> Result<(), StorageError> {
        for mutation in &record.mutations {
            self.apply(mutation)?;
        }
        self.sequences = record.sequences;
        self.commit_sequence = record.sequence;
        Ok(())
    }

    pub(crate) fn to_snapshot(&self) -> StateSnapshot {
        StateSnapshot {
            commit_sequence: self.commit_sequence,
            sequences: self.sequences,
            hosts: self.hosts.values().cloned().collect(),
            domain_assets: self.assets.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
        }
    }

    pub(crate) fn from_snapshot(snapshot: StateSnapshot) -> Result<Self, StorageError> {
        let mut state = Self::default();
        for user in snapshot.users {
            state.apply(&Mutation::UserInserted(user))?;
        }
        for host in snapshot.hosts {
            state.apply(&Mutation::HostInserted(host))?;
        }
        for asset in snapshot.domain_assets {
            state.apply(&Mutation::DomainAssetInserted(asset))?;
        }
        state.sequences = snapshot.sequences;
        state.commit_sequence = snapshot.commit_sequence;
        Ok(state)
    }

    pub(crate) fn inventory(&self) -> InventorySnapshot {
        InventorySnapshot {
            hosts: self.hosts.values().cloned().collect(),
            domain_assets: self.assets.values().cloned().collect(),
            users: self.users.values().cloned().collect(),
            commit_sequence: self.commit_sequence,
        }
    }
}

/// Unit of work over an exclusively locked [`InventoryState`].
pub(crate) struct StagedUnit<'a> {
    guard: RwLockWriteGuard<'a, InventoryState>,
    journal: Vec<Mutation>,
    undo: Vec<Undo>,
    /// Id sequences when the unit began.
    sequences: Sequences,
    sink: &'a dyn CommitSink,
    committed: bool,
}

impl<'a> StagedUnit<'a> {
    pub(crate) fn new(guard: RwLockWriteGuard<'a, InventoryState>, sink: &'a dyn CommitSink) -> Self {
        let sequences = guard.sequences;
        Self {
            guard,
            journal: Vec::new(),
            undo: Vec::new(),
            sequences,
            sink,
            committed: false,
        }
    }

    fn stage(&mut self, mutation: Mutation) -> Result<(), StorageError> {
        let undo = self.guard.undo_for(&mutation);
        self.guard.apply(&mutation)?;
        self.undo.extend(undo);
        self.journal.push(mutation);
        Ok(())
    }

    fn rollback(&mut self) {
        while let Some(undo) = self.undo.pop() {
            self.guard.revert(undo);
        }
        self.guard.sequences = self.sequences;
    }
}

impl Drop for StagedUnit<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

impl UnitOfWork for StagedUnit<'_> {
    fn host(&self, id: HostId) -> Result<Option<Host>, StorageError> {
        Ok(self.guard.hosts.get(&id).cloned())
    }

    fn host_by_address(&self, address: &str) -> Result<Option<Host>, StorageError> {
        Ok(self
            .guard
            .by_address
            .get(address)
            .and_then(|id| self.guard.hosts.get(id))
            .cloned())
    }

    fn domain_asset_by_key(&self, key: &AssetKey) -> Result<Option<DomainAsset>, StorageError> {
        Ok(self
            .guard
            .by_asset_key
            .get(key)
            .and_then(|id| self.guard.assets.get(id))
            .cloned())
    }

    fn domain_assets_for_host(&self, host_id: HostId) -> Result<Vec<DomainAsset>, StorageError> {
        Ok(self
            .guard
            .assets
            .values()
            .filter(|a| a.host_id == Some(host_id))
            .cloned()
            .collect())
    }

    fn user(&self, id: UserId) -> Result<Option<User>, StorageError> {
        Ok(self.guard.users.get(&id).cloned())
    }

    fn user_by_name(&self, username: &str) -> Result<Option<User>, StorageError> {
        Ok(self
            .guard
            .by_username
            .get(username)
            .and_then(|id| self.guard.users.get(id))
            .cloned())
    }

    fn allocate_id(&mut self, sequence: Sequence) -> u64 {
        self.guard.sequences.next(sequence)
    }

    fn insert_host(&mut self, host: Host) -> Result<(), StorageError> {
        self.stage(Mutation::HostInserted(host))
    }

    fn update_host(&mut self, host: Host) -> Result<(), StorageError> {
        self.stage(Mutation::HostUpdated(host))
    }

    fn insert_domain_asset(&mut self, asset: DomainAsset) -> Result<(), StorageError> {
        self.stage(Mutation::DomainAssetInserted(asset))
    }

    fn update_domain_asset(&mut self, asset: DomainAsset) -> Result<(), StorageError> {
        self.stage(Mutation::DomainAssetUpdated(asset))
    }

    fn insert_user(&mut self, user: User) -> Result<(), StorageError> {
        self.stage(Mutation::UserInserted(user))
    }

    fn clear_hosts(&mut self) -> Result<usize, StorageError> {
        let removed = self.guard.hosts.len();
        self.stage(Mutation::HostsCleared)?;
        Ok(removed)
    }

    fn commit_with(
        mut self: Box<Self>,
        on_commit: &mut dyn FnMut(u64),
    ) -> Result<u64, StorageError> {
        if self.journal.is_empty() {
            let sequence = self.guard.commit_sequence;
            on_commit(sequence);
            return Ok(sequence);
        }

        let sequence = self.guard.commit_sequence + 1;
        let record = CommitRecord {
            sequence,
            sequences: self.guard.sequences,
            mutations: std::mem::take(&mut self.journal),
        };
        self.guard.commit_sequence = sequence;
        if let Err(e) = self.sink.persist(&record, &self.guard) {
            self.guard.commit_sequence = sequence - 1;
            return Err(e);
        }

        self.committed = true;
        on_commit(sequence);
        Ok(sequence)
    }
}
