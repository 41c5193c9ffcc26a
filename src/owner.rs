//! Owning users.
//!
//! Users come from the identity provider; the inventory only keeps the rows it
//! needs to resolve an owner name on a host record.

use serde::{Deserialize, Serialize};

pub use crate::ids::UserId;

/// A user that can own hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Store-assigned id.
    pub id: UserId,
    /// Unique login name.
    pub username: String,
}
