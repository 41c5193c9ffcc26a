//! # hostrecon - Asset Inventory Reconciliation
//!
//! hostrecon merges what scanning tools report into a canonical inventory of
//! hosts, their network services, and directory-service (domain) assets, and
//! tells live observers what changed.
//!
//! ## Core Concepts
//!
//! - **Host**: a discovered network endpoint, identified by its canonical address
//! - **Service**: a port/protocol observed on a host
//! - **DomainAsset**: a directory object, identified by `(hostname, domain name)`
//!   and optionally linked to a host
//! - **Batch**: one scanner submission, applied as a single unit of work
//! - **ChangeEvent**: a post-commit notification delivered to every subscriber
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hostrecon::{EngineConfig, HostRecord, InventoryEngine};
//!
//! let engine = InventoryEngine::in_memory(EngineConfig::default())?;
//! let changes = engine.subscribe()?;
//!
//! let report = engine.submit_hosts(vec![HostRecord::new("10.0.0.1")])?;
//! assert_eq!(report.inserted(), 1);
//!
//! let event = changes.recv()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Inventory model
pub mod domain_asset;
pub mod error;
pub mod host;
pub mod ids;
pub mod owner;
pub mod record;

// Reconciliation
pub mod config;
pub mod linkage;
pub mod merge;
pub mod resolution;

// Execution, storage and notification
pub mod engine;
pub mod notify;
pub mod storage;

pub use config::{
    BatchPolicy, EngineConfig, NotifierConfig, OwnerPolicy, RuntimeConfig, ServiceMergeMode,
};
pub use domain_asset::{AssetKey, DomainAsset};
pub use engine::runtime::{ReconRuntime, RequestHandle};
pub use engine::{
    AssetOutcome, BatchReport, DomainAssetReport, InventoryEngine, RecordOutcome, Request,
    Response,
};
pub use error::{ExecutionError, ReconError, ReconResult, ValidationError};
pub use host::{Host, Service, ServiceKey};
pub use ids::{DomainAssetId, HostId, ServiceId, UserId};
pub use merge::MergeOutcome;
pub use notify::{ChangeEvent, ChangeNotifier, EventId, EventPayload, Subscription, SubscriptionId};
pub use owner::User;
pub use record::{DomainAssetRecord, HostRecord, ServiceRecord};
pub use resolution::Resolution;
pub use storage::{InMemoryInventory, InventorySnapshot, InventoryStore, StorageError, UnitOfWork};

#[cfg(feature = "persistent")]
pub use storage::persistent::{open_inventory, PersistentConfig, PersistentInventory};
