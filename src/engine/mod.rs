//! Reconciliation engine.
//!
//! Synchronous executor for the inventory's boundary operations. Each call runs
//! in its own unit of work against the store: records are validated, resolved,
//! merged and committed together, and change events are published only after
//! the commit succeeds.

/// Bounded worker pool for concurrent requests.
pub mod runtime;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{BatchPolicy, EngineConfig, OwnerPolicy};
use crate::domain_asset::{DomainAsset, DomainAssetId};
use crate::error::{ExecutionError, ReconError, ReconResult, ValidationError};
use crate::host::{Host, HostId};
use crate::ids::{Sequence, UserId};
use crate::linkage::resolve_link;
use crate::merge::{build_host, merge_host, reconcile_host_assets, upsert_domain_asset, MergeOutcome};
use crate::notify::{ChangeEvent, ChangeNotifier, EventPayload, Subscription};
use crate::owner::User;
use crate::record::{DomainAssetRecord, HostRecord};
use crate::resolution::{resolve_host, Resolution};
use crate::storage::{InMemoryInventory, InventoryStore, StorageError, UnitOfWork};

/// What happened to one record of a host batch.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    /// A new host was created.
    Inserted { address: String, host_id: HostId },
    /// A stored host (or its domain assets) changed.
    Updated { address: String, host_id: HostId },
    /// A stored host already matched the record.
    Unchanged { address: String, host_id: HostId },
    /// The record was not written (`MatchedOnly` batches with a match).
    Dropped { address: String },
}

impl RecordOutcome {
    /// Address of the record.
    #[must_use]
    pub fn address(&self) -> &str {
        match self {
            Self::Inserted { address, .. }
            | Self::Updated { address, .. }
            | Self::Unchanged { address, .. }
            | Self::Dropped { address } => address,
        }
    }

    /// Host the record resolved to, if it was written.
    #[must_use]
    pub const fn host_id(&self) -> Option<HostId> {
        match self {
            Self::Inserted { host_id, .. }
            | Self::Updated { host_id, .. }
            | Self::Unchanged { host_id, .. } => Some(*host_id),
            Self::Dropped { .. } => None,
        }
    }
}

/// Acknowledgment of a host batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    /// One entry per submitted record, in submission order.
    pub outcomes: Vec<RecordOutcome>,
    /// Owner names that matched no user. Those hosts were stored unowned.
    pub unresolved_owners: Vec<String>,
    /// Commit that applied the batch.
    pub commit_sequence: u64,
}

impl BatchReport {
    fn count(&self, pred: impl Fn(&RecordOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }

    /// Records that created a host.
    #[must_use]
    pub fn inserted(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Inserted { .. }))
    }

    /// Records that changed a stored host.
    #[must_use]
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Updated { .. }))
    }

    /// Records that matched a host without changing it.
    #[must_use]
    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Unchanged { .. }))
    }

    /// Records that were not written.
    #[must_use]
    pub fn dropped(&self) -> usize {
        self.count(|o| matches!(o, RecordOutcome::Dropped { .. }))
    }
}

/// What happened to one domain asset record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetOutcome {
    /// Stored asset id.
    pub id: DomainAssetId,
    /// Hostname (identity key, part one).
    pub hostname: String,
    /// Domain name (identity key, part two).
    pub domain_name: Option<String>,
    /// Host the asset is linked to after the merge.
    pub host_id: Option<HostId>,
    /// Insert, update or no-op.
    pub outcome: MergeOutcome,
}

/// Acknowledgment of a domain asset batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAssetReport {
    /// One entry per submitted record, in submission order.
    pub outcomes: Vec<AssetOutcome>,
    /// Commit that applied the batch.
    pub commit_sequence: u64,
}

/// A boundary operation, as queued on the runtime.
#[allow(missing_docs)]
#[derive(Debug, Clone)]
pub enum Request {
    ListHosts,
    SubmitHosts(Vec<HostRecord>),
    UpdateHost { id: HostId, record: HostRecord },
    DeleteAllHosts,
    ListDomainAssets,
    SubmitDomainAssets(Vec<DomainAssetRecord>),
}

/// Result of a [`Request`].
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Hosts(Vec<HostRecord>),
    HostBatch(BatchReport),
    HostUpdated(HostRecord),
    HostsDeleted(usize),
    DomainAssets(Vec<DomainAssetRecord>),
    DomainAssetBatch(DomainAssetReport),
}

/// Per-record result inside a batch.
struct Applied {
    outcome: RecordOutcome,
    /// Resolved to a host that existed before this batch.
    matched: bool,
}

/// Host inventory reconciliation engine.
pub struct InventoryEngine {
    store: Arc<dyn InventoryStore>,
    notifier: ChangeNotifier,
    config: EngineConfig,
}

impl std::fmt::Debug for InventoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InventoryEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl InventoryEngine {
    /// Create an engine over `store`.
    ///
    /// # Errors
    /// Invalid configuration, or the notifier thread cannot start.
    pub fn new(store: Arc<dyn InventoryStore>, config: EngineConfig) -> ReconResult<Self> {
        let config = config.validate()?;
        let notifier = ChangeNotifier::new(config.notifier.clone())?;
        Ok(Self {
            store,
            notifier,
            config,
        })
    }

    /// Create an engine over a fresh in-memory store.
    pub fn in_memory(config: EngineConfig) -> ReconResult<Self> {
        Self::new(Arc::new(InMemoryInventory::new()), config)
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Change notifier.
    #[must_use]
    pub const fn notifier(&self) -> &ChangeNotifier {
        &self.notifier
    }

    /// Subscribe to change events.
    pub fn subscribe(&self) -> ReconResult<Subscription> {
        self.notifier.subscribe()
    }

    /// Execute a queued request.
    pub fn execute(&self, request: Request) -> ReconResult<Response> {
        match request {
            Request::ListHosts => self.list_hosts().map(Response::Hosts),
            Request::SubmitHosts(records) => self.submit_hosts(records).map(Response::HostBatch),
            Request::UpdateHost { id, record } => {
                self.update_host(id, record).map(Response::HostUpdated)
            }
            Request::DeleteAllHosts => self.delete_all_hosts().map(Response::HostsDeleted),
            Request::ListDomainAssets => self.list_domain_assets().map(Response::DomainAssets),
            Request::SubmitDomainAssets(records) => self
                .submit_domain_assets(records)
                .map(Response::DomainAssetBatch),
        }
    }

    fn begin(&self) -> ReconResult<Box<dyn UnitOfWork + '_>> {
        self.store.begin().map_err(ReconError::storage)
    }

    fn publish_all(&self, commit_sequence: u64, events: &mut Vec<EventPayload>) {
        for payload in events.drain(..) {
            self.notifier.publish(ChangeEvent::new(commit_sequence, payload));
        }
    }

    /// Full inventory with nested services and domain assets and owner names resolved.
    pub fn list_hosts(&self) -> ReconResult<Vec<HostRecord>> {
        let snapshot = self.store.snapshot().map_err(ReconError::storage)?;
        let users: HashMap<UserId, &str> = snapshot
            .users
            .iter()
            .map(|u| (u.id, u.username.as_str()))
            .collect();
        let mut assets: HashMap<HostId, Vec<DomainAsset>> = HashMap::new();
        for asset in &snapshot.domain_assets {
            if let Some(host_id) = asset.host_id {
                assets.entry(host_id).or_default().push(asset.clone());
            }
        }

        Ok(snapshot
            .hosts
            .iter()
            .map(|host| {
                let owner = host.owner.and_then(|id| users.get(&id)).map(|u| (*u).to_string());
                let linked = assets.get(&host.id).map_or(&[][..], Vec::as_slice);
                HostRecord::from_host(host, owner, linked)
            })
            .collect())
    }

    /// All domain assets.
    pub fn list_domain_assets(&self) -> ReconResult<Vec<DomainAssetRecord>> {
        let snapshot = self.store.snapshot().map_err(ReconError::storage)?;
        Ok(snapshot
            .domain_assets
            .iter()
            .map(DomainAssetRecord::from_asset)
            .collect())
    }

    fn resolve_owner(
        &self,
        uow: &dyn UnitOfWork,
        name: Option<&str>,
        unresolved: &mut Vec<String>,
    ) -> ReconResult<Option<UserId>> {
        let Some(name) = name else {
            return Ok(None);
        };
        if let Some(user) = uow.user_by_name(name).map_err(ReconError::storage)? {
            return Ok(Some(user.id));
        }
        match self.config.owner_policy {
            OwnerPolicy::Reject => Err(ValidationError::UnknownOwner {
                username: name.to_string(),
            }
            .into()),
            OwnerPolicy::Warn => {
                tracing::warn!(owner = name, "unknown owner, host stored unowned");
                if !unresolved.iter().any(|n| n == name) {
                    unresolved.push(name.to_string());
                }
                Ok(None)
            }
        }
    }

    fn owner_name(uow: &dyn UnitOfWork, owner: Option<UserId>) -> ReconResult<Option<String>> {
        let Some(id) = owner else {
            return Ok(None);
        };
        Ok(uow
            .user(id)
            .map_err(ReconError::storage)?
            .map(|u| u.username))
    }

    /// Canonical view of a host as staged in `uow`.
    fn host_view(uow: &dyn UnitOfWork, host: &Host) -> ReconResult<HostRecord> {
        let assets = uow
            .domain_assets_for_host(host.id)
            .map_err(ReconError::storage)?;
        let owner = Self::owner_name(uow, host.owner)?;
        Ok(HostRecord::from_host(host, owner, &assets))
    }

    fn apply_host_record(
        &self,
        uow: &mut dyn UnitOfWork,
        record: &HostRecord,
        inserted: &mut HashSet<HostId>,
        unresolved: &mut Vec<String>,
    ) -> ReconResult<Applied> {
        let address = record.address.clone();
        match resolve_host(&*uow, record).map_err(ReconError::storage)? {
            Resolution::Existing(stored) => {
                let host_id = stored.id;
                let mut merged = merge_host(uow, &stored, record, self.config.service_merge);
                let host_changed = !merged.same_content(&stored);
                if host_changed {
                    merged.version = stored.version + 1;
                    uow.update_host(merged).map_err(ReconError::storage)?;
                }
                let incoming = record.domain_assets.as_deref().unwrap_or_default();
                let asset_writes = reconcile_host_assets(uow, host_id, incoming)?;

                let outcome = if host_changed || asset_writes > 0 {
                    RecordOutcome::Updated { address, host_id }
                } else {
                    RecordOutcome::Unchanged { address, host_id }
                };
                tracing::debug!(host = %host_id, address = outcome.address(), host_changed, asset_writes, "host record merged");
                Ok(Applied {
                    outcome,
                    matched: !inserted.contains(&host_id),
                })
            }
            Resolution::New => {
                let owner = self.resolve_owner(uow, record.owner_name.as_deref(), unresolved)?;
                let host = build_host(uow, record, owner);
                let host_id = host.id;
                uow.insert_host(host).map_err(|e| match e {
                    StorageError::DuplicateKey(_) => ReconError::Execution(ExecutionError::AddressInUse {
                        address: address.clone(),
                    }),
                    other => ReconError::storage(other),
                })?;
                let incoming = record.domain_assets.as_deref().unwrap_or_default();
                reconcile_host_assets(uow, host_id, incoming)?;
                inserted.insert(host_id);
                tracing::debug!(host = %host_id, address = %address, "host record inserted");
                Ok(Applied {
                    outcome: RecordOutcome::Inserted { address, host_id },
                    matched: false,
                })
            }
        }
    }

    /// Reconcile a batch of host records into the inventory.
    ///
    /// Every record is validated before anything is written; one invalid record
    /// rejects the batch. The batch commits as one unit. Events are published
    /// after the commit: `HostsUpgraded` when records matched stored hosts,
    /// `HostsAdded` when hosts were inserted.
    ///
    /// # Errors
    /// - `Validation` for a malformed record, or an unknown owner under `OwnerPolicy::Reject`
    /// - `Storage` when the store fails; nothing is committed
    pub fn submit_hosts(&self, records: Vec<HostRecord>) -> ReconResult<BatchReport> {
        let records = records
            .into_iter()
            .map(HostRecord::validated)
            .collect::<Result<Vec<_>, _>>()?;
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let mut uow = self.begin()?;
        let mut inserted = HashSet::new();
        let mut unresolved = Vec::new();
        let mut applied: Vec<Option<Applied>> = Vec::with_capacity(records.len());

        let apply_all = match self.config.batch_policy {
            BatchPolicy::PerRecord => true,
            BatchPolicy::MatchedOnly => {
                let mut any_matched = false;
                for record in &records {
                    any_matched |= resolve_host(&*uow, record)
                        .map_err(ReconError::storage)?
                        .is_existing();
                }
                !any_matched
            }
        };

        for record in &records {
            if apply_all || resolve_host(&*uow, record).map_err(ReconError::storage)?.is_existing() {
                applied.push(Some(self.apply_host_record(&mut *uow, record, &mut inserted, &mut unresolved)?));
            } else {
                tracing::warn!(address = %record.address, "unmatched record dropped by matched-only batch policy");
                applied.push(None);
            }
        }

        let mut upgraded_ids: Vec<HostId> = Vec::new();
        for a in applied.iter().flatten() {
            if let (true, Some(id)) = (a.matched, a.outcome.host_id()) {
                if !upgraded_ids.contains(&id) {
                    upgraded_ids.push(id);
                }
            }
        }
        let mut upgraded = Vec::with_capacity(upgraded_ids.len());
        for id in upgraded_ids {
            if let Some(host) = uow.host(id).map_err(ReconError::storage)? {
                upgraded.push(Self::host_view(&*uow, &host)?);
            }
        }

        // Published under the unit's exclusive access so delivery follows commit order.
        let added = !inserted.is_empty();
        let mut events = Vec::with_capacity(2);
        if !upgraded.is_empty() {
            events.push(EventPayload::HostsUpgraded { records: upgraded });
        }
        if added && (events.is_empty() || self.config.batch_policy == BatchPolicy::PerRecord) {
            events.push(EventPayload::HostsAdded);
        }
        let commit_sequence = uow
            .commit_with(&mut |sequence| self.publish_all(sequence, &mut events))
            .map_err(ReconError::storage)?;

        let outcomes: Vec<RecordOutcome> = applied
            .into_iter()
            .zip(&records)
            .map(|(a, record)| match a {
                Some(a) => a.outcome,
                None => RecordOutcome::Dropped {
                    address: record.address.clone(),
                },
            })
            .collect();
        let report = BatchReport {
            outcomes,
            unresolved_owners: unresolved,
            commit_sequence,
        };
        tracing::info!(
            inserted = report.inserted(),
            updated = report.updated(),
            unchanged = report.unchanged(),
            dropped = report.dropped(),
            commit_sequence,
            "host batch committed"
        );

        Ok(report)
    }

    /// Overwrite a single host.
    ///
    /// Address, owner (by name), hostname, state, comments, standing, OS and
    /// subnet are replaced; services and domain assets are left alone. A
    /// `version` on the record must equal the stored row version.
    ///
    /// # Errors
    /// - `HostNotFound` if the host is missing or its version moved on
    /// - `AddressInUse` if the new address belongs to another host
    /// - `Validation` for a malformed record or a rejected owner
    pub fn update_host(&self, id: HostId, record: HostRecord) -> ReconResult<HostRecord> {
        let record = record.validated()?;
        let not_found = || ReconError::Execution(ExecutionError::HostNotFound { id });

        let mut uow = self.begin()?;
        let stored = uow
            .host(id)
            .map_err(ReconError::storage)?
            .ok_or_else(not_found)?;
        if record.version.is_some_and(|v| v != stored.version) {
            return Err(not_found());
        }
        if let Some(other) = uow
            .host_by_address(&record.address)
            .map_err(ReconError::storage)?
        {
            if other.id != id {
                return Err(ExecutionError::AddressInUse {
                    address: record.address,
                }
                .into());
            }
        }

        let mut unresolved = Vec::new();
        let owner = self.resolve_owner(&*uow, record.owner_name.as_deref(), &mut unresolved)?;
        let updated = Host {
            id,
            owner,
            address: record.address.clone(),
            hostname: record.hostname.clone(),
            state: record.state.clone(),
            comments: record.comments.clone(),
            standing: record.standing.clone(),
            os: record.os.clone(),
            subnet: record.subnet.clone(),
            services: stored.services.clone(),
            version: stored.version + 1,
        };

        let current = if updated.same_content(&stored) {
            stored
        } else {
            uow.update_host(updated.clone()).map_err(|e| match e {
                StorageError::VersionConflict { .. } | StorageError::HostNotFound(_) => not_found(),
                StorageError::DuplicateKey(_) => ReconError::Execution(ExecutionError::AddressInUse {
                    address: record.address.clone(),
                }),
                other => ReconError::storage(other),
            })?;
            updated
        };
        let view = Self::host_view(&*uow, &current)?;
        let mut events = vec![EventPayload::HostUpdated {
            record: view.clone(),
        }];
        let commit_sequence = uow
            .commit_with(&mut |sequence| self.publish_all(sequence, &mut events))
            .map_err(ReconError::storage)?;

        tracing::info!(host = %id, version = current.version, commit_sequence, "host updated");
        Ok(view)
    }

    /// Remove every host and its services. Domain assets stay, unlinked.
    ///
    /// Returns the number of removed hosts. No event is published.
    pub fn delete_all_hosts(&self) -> ReconResult<usize> {
        let mut uow = self.begin()?;
        let removed = uow.clear_hosts().map_err(ReconError::storage)?;
        let commit_sequence = uow.commit().map_err(ReconError::storage)?;
        tracing::info!(removed, commit_sequence, "all hosts deleted");
        Ok(removed)
    }

    /// Upsert a batch of domain assets by `(hostname, domain name)`.
    ///
    /// Each record's host link is re-evaluated. The batch commits as one unit.
    ///
    /// # Errors
    /// - `EmptyBatch` for an empty submission
    /// - `MissingField` for a record without a hostname
    /// - `HostNotFound` for an explicit host id that does not exist
    pub fn submit_domain_assets(
        &self,
        records: Vec<DomainAssetRecord>,
    ) -> ReconResult<DomainAssetReport> {
        if records.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }
        let records = records
            .into_iter()
            .map(DomainAssetRecord::validated)
            .collect::<Result<Vec<_>, _>>()?;

        let mut uow = self.begin()?;
        let mut outcomes = Vec::with_capacity(records.len());
        for record in &records {
            let link = resolve_link(&*uow, record)?;
            let (asset, outcome) = upsert_domain_asset(&mut *uow, record, link)?;
            tracing::debug!(
                asset = %asset.id,
                hostname = %asset.hostname,
                linked = ?asset.host_id.map(HostId::get),
                ?outcome,
                "domain asset merged"
            );
            outcomes.push(AssetOutcome {
                id: asset.id,
                hostname: asset.hostname,
                domain_name: asset.domain_name,
                host_id: asset.host_id,
                outcome,
            });
        }
        let commit_sequence = uow.commit().map_err(ReconError::storage)?;

        tracing::info!(records = outcomes.len(), commit_sequence, "domain asset batch committed");
        Ok(DomainAssetReport {
            outcomes,
            commit_sequence,
        })
    }

    /// Add a user so host owner names can resolve. Existing names are returned as-is.
    ///
    /// # Errors
    /// `MissingField` for a blank username.
    pub fn register_user(&self, username: &str) -> ReconResult<User> {
        let username = username.trim();
        if username.is_empty() {
            return Err(ValidationError::MissingField {
                field: "username".to_string(),
            }
            .into());
        }

        let mut uow = self.begin()?;
        if let Some(user) = uow.user_by_name(username).map_err(ReconError::storage)? {
            return Ok(user);
        }
        let user = User {
            id: UserId::new(uow.allocate_id(Sequence::User)),
            username: username.to_string(),
        };
        uow.insert_user(user.clone()).map_err(ReconError::storage)?;
        uow.commit().map_err(ReconError::storage)?;
        tracing::info!(user = %user.id, username, "user registered");
        Ok(user)
    }
}
