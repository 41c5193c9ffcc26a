//! Merge engine.
//!
//! Applies an incoming record to a resolved entity, or builds a new one.
//! Merges are pure with respect to the row version: callers compare the result
//! with the stored entity and only write (and bump the version) when something
//! changed.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::ServiceMergeMode;
use crate::domain_asset::{AssetKey, DomainAsset, DomainAssetId};
use crate::error::{ReconError, ReconResult};
use crate::host::{Host, HostId, Service, ServiceId, ServiceKey};
use crate::ids::{Sequence, UserId};
use crate::record::{DomainAssetRecord, HostRecord, ServiceRecord};
use crate::resolution::{resolve_domain_asset, Resolution};
use crate::storage::UnitOfWork;

/// What a single upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// A new row was written.
    Inserted,
    /// A stored row changed.
    Updated,
    /// The stored row already matched.
    Unchanged,
}

/// One entry of a service diff, in incoming order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceChange {
    /// No stored service has this key.
    Added(ServiceRecord),
    /// Stored service with this id gets new field values.
    Updated(ServiceId, ServiceRecord),
    /// Stored service already matches.
    Unchanged(Service),
}

/// Three-way diff of a host's services, keyed by `(port, protocol)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceDiff {
    /// Incoming services in submission order.
    pub changes: Vec<ServiceChange>,
    /// Stored services with no incoming counterpart.
    pub removed: Vec<Service>,
}

impl ServiceDiff {
    /// Returns true if applying the diff changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
            && self
                .changes
                .iter()
                .all(|c| matches!(c, ServiceChange::Unchanged(_)))
    }
}

fn record_key(record: &ServiceRecord) -> ServiceKey {
    ServiceKey::new(record.port, record.protocol.as_deref())
}

/// Collapse services sharing a key. The last occurrence's values win, at the
/// position of the first occurrence.
fn dedup_services(incoming: &[ServiceRecord]) -> Vec<&ServiceRecord> {
    let mut out: Vec<&ServiceRecord> = Vec::with_capacity(incoming.len());
    let mut slots: HashMap<ServiceKey, usize> = HashMap::with_capacity(incoming.len());
    for record in incoming {
        match slots.get(&record_key(record)) {
            Some(&slot) => out[slot] = record,
            None => {
                slots.insert(record_key(record), out.len());
                out.push(record);
            }
        }
    }
    out
}

fn service_matches(service: &Service, record: &ServiceRecord) -> bool {
    service.port == record.port
        && service.protocol == record.protocol
        && service.state == record.state
        && service.name == record.name
        && service.version == record.version
        && service.script == record.script
}

fn service_from_record(id: ServiceId, record: &ServiceRecord) -> Service {
    Service {
        id,
        port: record.port,
        protocol: record.protocol.clone(),
        state: record.state.clone(),
        name: record.name.clone(),
        version: record.version.clone(),
        script: record.script.clone(),
    }
}

/// Diff incoming services against the stored list.
#[must_use]
pub fn diff_services(existing: &[Service], incoming: &[ServiceRecord]) -> ServiceDiff {
    let stored: HashMap<ServiceKey, &Service> = existing.iter().map(|s| (s.key(), s)).collect();
    let incoming = dedup_services(incoming);

    let mut seen = HashSet::with_capacity(incoming.len());
    let changes = incoming
        .into_iter()
        .map(|record| {
            let key = record_key(record);
            let change = match stored.get(&key) {
                Some(s) if service_matches(s, record) => ServiceChange::Unchanged((*s).clone()),
                Some(s) => ServiceChange::Updated(s.id, record.clone()),
                None => ServiceChange::Added(record.clone()),
            };
            seen.insert(key);
            change
        })
        .collect();

    let removed = existing
        .iter()
        .filter(|s| !seen.contains(&s.key()))
        .cloned()
        .collect();

    ServiceDiff { changes, removed }
}

fn fresh_services(uow: &mut dyn UnitOfWork, incoming: &[ServiceRecord]) -> Vec<Service> {
    dedup_services(incoming)
        .into_iter()
        .map(|record| service_from_record(ServiceId::new(uow.allocate_id(Sequence::Service)), record))
        .collect()
}

/// Compute a host's new service list.
///
/// In `Diff` mode services keep their ids across updates. In `Replace` mode the
/// list is rebuilt with fresh ids, unless it is identical to the stored one.
pub fn merge_services(
    uow: &mut dyn UnitOfWork,
    existing: &[Service],
    incoming: &[ServiceRecord],
    mode: ServiceMergeMode,
) -> Vec<Service> {
    let diff = diff_services(existing, incoming);
    if diff.is_noop() {
        return existing.to_vec();
    }

    match mode {
        ServiceMergeMode::Replace => fresh_services(uow, incoming),
        ServiceMergeMode::Diff => diff
            .changes
            .into_iter()
            .map(|change| match change {
                ServiceChange::Unchanged(service) => service,
                ServiceChange::Updated(id, record) => service_from_record(id, &record),
                ServiceChange::Added(record) => service_from_record(
                    ServiceId::new(uow.allocate_id(Sequence::Service)),
                    &record,
                ),
            })
            .collect(),
    }
}

fn non_blank(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty()).cloned()
}

/// Apply a batch record to a stored host.
///
/// Hostname changes only to a non-blank value; state and subnet are always
/// taken; comments, standing and OS only when present. The owner is kept.
/// The returned host carries the stored version.
pub fn merge_host(
    uow: &mut dyn UnitOfWork,
    existing: &Host,
    record: &HostRecord,
    mode: ServiceMergeMode,
) -> Host {
    let mut merged = existing.clone();
    if let Some(hostname) = non_blank(record.hostname.as_ref()) {
        merged.hostname = Some(hostname);
    }
    merged.state = record.state.clone();
    merged.subnet = record.subnet.clone();
    if record.comments.is_some() {
        merged.comments = record.comments.clone();
    }
    if record.standing.is_some() {
        merged.standing = record.standing.clone();
    }
    if record.os.is_some() {
        merged.os = record.os.clone();
    }
    merged.services = merge_services(uow, &existing.services, &record.services, mode);
    merged
}

/// Build a new host from a batch record.
pub fn build_host(uow: &mut dyn UnitOfWork, record: &HostRecord, owner: Option<UserId>) -> Host {
    let id = HostId::new(uow.allocate_id(Sequence::Host));
    Host {
        id,
        owner,
        address: record.address.clone(),
        hostname: non_blank(record.hostname.as_ref()),
        state: record.state.clone(),
        comments: record.comments.clone(),
        standing: record.standing.clone(),
        os: record.os.clone(),
        subnet: record.subnet.clone(),
        services: fresh_services(uow, &record.services),
        version: 1,
    }
}

/// Overwrite every field of a stored asset from the record and set its link.
#[must_use]
pub fn merge_domain_asset(
    existing: &DomainAsset,
    record: &DomainAssetRecord,
    link: Option<HostId>,
) -> DomainAsset {
    DomainAsset {
        id: existing.id,
        host_id: link,
        hostname: record.hostname.clone(),
        domain_name: record.domain_name.clone(),
        distinguished_name: record.distinguished_name.clone(),
        role: record.role.clone(),
        address: record.address.clone(),
        is_domain_controller: record.is_domain_controller,
        notes: record.notes.clone(),
        version: existing.version,
    }
}

/// Resolve an asset record by key, then insert it or merge it into the stored row.
///
/// # Errors
/// Storage failures, including a `link` to a host that does not exist.
pub fn upsert_domain_asset(
    uow: &mut dyn UnitOfWork,
    record: &DomainAssetRecord,
    link: Option<HostId>,
) -> ReconResult<(DomainAsset, MergeOutcome)> {
    match resolve_domain_asset(uow, record).map_err(ReconError::storage)? {
        Resolution::Existing(stored) => {
            let mut merged = merge_domain_asset(&stored, record, link);
            if merged.same_content(&stored) {
                return Ok((stored, MergeOutcome::Unchanged));
            }
            merged.version = stored.version + 1;
            uow.update_domain_asset(merged.clone())
                .map_err(ReconError::storage)?;
            Ok((merged, MergeOutcome::Updated))
        }
        Resolution::New => {
            let id = DomainAssetId::new(uow.allocate_id(Sequence::DomainAsset));
            let asset = merge_domain_asset(
                &DomainAsset {
                    id,
                    host_id: None,
                    hostname: String::new(),
                    domain_name: None,
                    distinguished_name: None,
                    role: None,
                    address: None,
                    is_domain_controller: false,
                    notes: None,
                    version: 1,
                },
                record,
                link,
            );
            uow.insert_domain_asset(asset.clone())
                .map_err(ReconError::storage)?;
            Ok((asset, MergeOutcome::Inserted))
        }
    }
}

/// Make `incoming` the set of domain assets linked to `host_id`.
///
/// Each record is upserted by key and linked to the host. Assets linked to the
/// host but absent from `incoming` are unlinked, never deleted. Returns the
/// number of rows written.
pub fn reconcile_host_assets(
    uow: &mut dyn UnitOfWork,
    host_id: HostId,
    incoming: &[DomainAssetRecord],
) -> ReconResult<usize> {
    let mut writes = 0;
    let mut keep: HashSet<AssetKey> = HashSet::with_capacity(incoming.len());
    for record in incoming {
        let (asset, outcome) = upsert_domain_asset(uow, record, Some(host_id))?;
        keep.insert(asset.key());
        if outcome != MergeOutcome::Unchanged {
            writes += 1;
        }
    }

    let linked = uow
        .domain_assets_for_host(host_id)
        .map_err(ReconError::storage)?;
    for mut asset in linked {
        if keep.contains(&asset.key()) {
            continue;
        }
        asset.host_id = None;
        asset.version += 1;
        uow.update_domain_asset(asset).map_err(ReconError::storage)?;
        writes += 1;
    }
    Ok(writes)
}
