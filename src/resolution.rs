//! Identity resolution.
//!
//! Maps an incoming record onto the stored entity with the same natural key.
//! Hosts are keyed by canonical address, domain assets by `(hostname, domain name)`.
//! Matching is exact; no case folding.

use crate::domain_asset::{AssetKey, DomainAsset};
use crate::host::Host;
use crate::record::{DomainAssetRecord, HostRecord};
use crate::storage::{StorageError, UnitOfWork};

/// Outcome of resolving one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<T> {
    /// The record refers to this stored entity.
    Existing(T),
    /// No stored entity has the record's key.
    New,
}

impl<T> Resolution<T> {
    /// Returns true if a stored entity matched.
    #[must_use]
    pub const fn is_existing(&self) -> bool {
        matches!(self, Self::Existing(_))
    }

    /// The matched entity, if any.
    #[must_use]
    pub fn existing(self) -> Option<T> {
        match self {
            Self::Existing(v) => Some(v),
            Self::New => None,
        }
    }
}

impl<T> From<Option<T>> for Resolution<T> {
    fn from(found: Option<T>) -> Self {
        found.map_or(Self::New, Self::Existing)
    }
}

/// Resolve a validated host record by its address.
///
/// Reads go through the unit of work, so hosts staged earlier in the same
/// batch are found too.
pub fn resolve_host(
    uow: &dyn UnitOfWork,
    record: &HostRecord,
) -> Result<Resolution<Host>, StorageError> {
    Ok(uow.host_by_address(&record.address)?.into())
}

/// Resolve a validated domain asset record by `(hostname, domain name)`.
pub fn resolve_domain_asset(
    uow: &dyn UnitOfWork,
    record: &DomainAssetRecord,
) -> Result<Resolution<DomainAsset>, StorageError> {
    let key = AssetKey::new(&record.hostname, record.domain_name.as_deref());
    Ok(uow.domain_asset_by_key(&key)?.into())
}
