//! Inventory storage.
//!
//! [`InventoryStore`] is the transactional contract the engine depends on.
//! [`InMemoryInventory`] keeps everything in process; the `persistent` feature
//! adds a WAL-backed store that survives restarts.

mod state;
mod traits;

pub mod memory;
#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::InMemoryInventory;
pub use state::{CommitRecord, Mutation, Sequences, StateSnapshot};
pub use traits::{InventorySnapshot, InventoryStore, StorageError, UnitOfWork};
