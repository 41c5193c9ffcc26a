//! In-memory storage backend.
//!
//! Thread-safe, non-durable implementation of [`InventoryStore`]. It is intended
//! for embedded usage, tests, and as a reference implementation of the contract.

use std::sync::RwLock;

use crate::storage::state::{DiscardSink, InventoryState, StagedUnit};
use crate::storage::traits::{InventorySnapshot, InventoryStore, StorageError, UnitOfWork};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

static DISCARD: DiscardSink = DiscardSink;

/// Thread-safe in-memory inventory.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    state: RwLock<InventoryState>,
}

impl InMemoryInventory {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl InventoryStore for InMemoryInventory {
    fn begin(&self) -> Result<Box<dyn UnitOfWork + '_>, StorageError> {
        let guard = self.state.write().map_err(|_| lock_err("inventory.begin"))?;
        Ok(Box::new(StagedUnit::new(guard, &DISCARD)))
    }

    fn snapshot(&self) -> Result<InventorySnapshot, StorageError> {
        let state = self.state.read().map_err(|_| lock_err("inventory.snapshot"))?;
        Ok(state.inventory())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::host::{Host, HostId};
    use crate::ids::{Sequence, UserId};
    use crate::owner::User;

    fn host(id: u64, address: &str) -> Host {
        Host {
            id: HostId::new(id),
            owner: None,
            address: address.to_string(),
            hostname: None,
            state: None,
            comments: None,
            standing: None,
            os: None,
            subnet: None,
            services: Vec::new(),
            version: 1,
        }
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let store = InMemoryInventory::new();
        let mut uow = store.begin().unwrap();
        let id = uow.allocate_id(Sequence::Host);
        uow.insert_host(host(id, "10.0.0.1")).unwrap();
        assert!(uow.host_by_address("10.0.0.1").unwrap().is_some());
        let seq = uow.commit().unwrap();

        assert_eq!(seq, 1);
        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot.hosts.len(), 1);
        assert_eq!(snapshot.commit_sequence, 1);
    }

    #[test]
    fn test_dropped_unit_rolls_back() {
        let store = InMemoryInventory::new();
        {
            let mut uow = store.begin().unwrap();
            let id = uow.allocate_id(Sequence::Host);
            uow.insert_host(host(id, "10.0.0.1")).unwrap();
        }
        let snapshot = store.snapshot().unwrap();
        assert!(snapshot.hosts.is_empty());
        assert_eq!(snapshot.commit_sequence, 0);

        // The discarded allocation is not visible to the next unit either.
        let mut uow = store.begin().unwrap();
        assert_eq!(uow.allocate_id(Sequence::Host), 1);
    }

    #[test]
    fn test_failed_write_leaves_unit_usable() {
        let store = InMemoryInventory::new();
        let mut uow = store.begin().unwrap();
        uow.insert_host(host(1, "10.0.0.1")).unwrap();
        assert!(uow.insert_host(host(2, "10.0.0.1")).is_err());
        uow.insert_host(host(3, "10.0.0.3")).unwrap();
        uow.commit().unwrap();

        assert_eq!(store.snapshot().unwrap().hosts.len(), 2);
    }

    #[test]
    fn test_empty_commit_does_not_advance_sequence() {
        let store = InMemoryInventory::new();
        let uow = store.begin().unwrap();
        assert_eq!(uow.commit().unwrap(), 0);
    }

    #[test]
    fn test_user_lookup_by_name() {
        let store = InMemoryInventory::new();
        let mut uow = store.begin().unwrap();
        uow.insert_user(User {
            id: UserId::new(1),
            username: "alice".to_string(),
        })
        .unwrap();
        assert!(uow.user_by_name("alice").unwrap().is_some());
        assert!(uow.user_by_name("Alice").unwrap().is_none());
        uow.commit().unwrap();
    }
}
