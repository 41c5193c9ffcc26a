//! Domain asset to host linkage.
//!
//! Re-evaluated on every merge:
//! 1. an explicit host id is used as given, but must reference a stored host
//! 2. otherwise the asset's address is looked up among host addresses
//! 3. otherwise the asset is unlinked

use crate::error::{ExecutionError, ReconError, ReconResult};
use crate::host::HostId;
use crate::record::DomainAssetRecord;
use crate::storage::UnitOfWork;

/// Determine the host a domain asset record should link to.
///
/// # Errors
/// `HostNotFound` when the record names a host id that does not exist.
pub fn resolve_link(
    uow: &dyn UnitOfWork,
    record: &DomainAssetRecord,
) -> ReconResult<Option<HostId>> {
    if let Some(id) = record.host_id {
        return match uow.host(id).map_err(ReconError::storage)? {
            Some(_) => Ok(Some(id)),
            None => Err(ExecutionError::HostNotFound { id }.into()),
        };
    }

    let Some(address) = record.address.as_deref().filter(|a| !a.trim().is_empty()) else {
        return Ok(None);
    };
    Ok(uow
        .host_by_address(address)
        .map_err(ReconError::storage)?
        .map(|h| h.id))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::host::Host;
    use crate::ids::Sequence;
    use crate::storage::{InMemoryInventory, InventoryStore};

    fn store_with_host(address: &str) -> (InMemoryInventory, HostId) {
        let store = InMemoryInventory::new();
        let mut uow = store.begin().unwrap();
        let id = HostId::new(uow.allocate_id(Sequence::Host));
        uow.insert_host(Host {
            id,
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
        })
        .unwrap();
        uow.commit().unwrap();
        (store, id)
    }

    fn asset(address: Option<&str>, host_id: Option<HostId>) -> DomainAssetRecord {
        DomainAssetRecord {
            hostname: "dc1".to_string(),
            address: address.map(str::to_string),
            host_id,
            ..DomainAssetRecord::default()
        }
    }

    #[test]
    fn test_links_by_address() {
        let (store, id) = store_with_host("10.0.0.5");
        let uow = store.begin().unwrap();
        assert_eq!(resolve_link(&*uow, &asset(Some("10.0.0.5"), None)).unwrap(), Some(id));
        assert_eq!(resolve_link(&*uow, &asset(Some("10.0.0.6"), None)).unwrap(), None);
        assert_eq!(resolve_link(&*uow, &asset(Some("  "), None)).unwrap(), None);
        assert_eq!(resolve_link(&*uow, &asset(None, None)).unwrap(), None);
    }

    #[test]
    fn test_explicit_host_id_wins_over_address() {
        let (store, id) = store_with_host("10.0.0.5");
        let uow = store.begin().unwrap();
        let linked = resolve_link(&*uow, &asset(Some("10.9.9.9"), Some(id))).unwrap();
        assert_eq!(linked, Some(id));
    }

    #[test]
    fn test_dangling_host_id_is_rejected() {
        let (store, _) = store_with_host("10.0.0.5");
        let uow = store.begin().unwrap();
        let err = resolve_link(&*uow, &asset(None, Some(HostId::new(99)))).unwrap_err();
        assert!(err.is_not_found());
    }
}
