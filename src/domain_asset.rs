//! Directory-service assets.
//!
//! A [`DomainAsset`] is identified by its `(hostname, domain name)` pair and may
//! optionally point at the [`crate::Host`] it runs on.

use serde::{Deserialize, Serialize};

pub use crate::ids::DomainAssetId;
use crate::ids::HostId;

/// A directory-service object (e.g. an Active Directory computer).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainAsset {
    /// Store-assigned id.
    pub id: DomainAssetId,
    /// Owning host, if linked.
    pub host_id: Option<HostId>,
    /// Hostname. Never empty.
    pub hostname: String,
    /// Domain name.
    pub domain_name: Option<String>,
    /// Distinguished name.
    pub distinguished_name: Option<String>,
    /// Directory role.
    pub role: Option<String>,
    /// Network address as reported by the directory.
    pub address: Option<String>,
    /// Whether the asset is a domain controller.
    pub is_domain_controller: bool,
    /// Free-text notes.
    pub notes: Option<String>,
    /// Row version.
    pub version: u64,
}

impl DomainAsset {
    /// The identity key of this asset.
    #[must_use]
    pub fn key(&self) -> AssetKey {
        AssetKey::new(&self.hostname, self.domain_name.as_deref())
    }

    /// Returns true if both assets hold the same content, ignoring the row version.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.host_id == other.host_id
            && self.hostname == other.hostname
            && self.domain_name == other.domain_name
            && self.distinguished_name == other.distinguished_name
            && self.role == other.role
            && self.address == other.address
            && self.is_domain_controller == other.is_domain_controller
            && self.notes == other.notes
    }
}

/// Identity key of a domain asset: `(hostname, domain name)`.
///
/// Compared exactly. An absent domain name only matches an absent one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AssetKey {
    /// Hostname.
    pub hostname: String,
    /// Domain name.
    pub domain_name: Option<String>,
}

impl AssetKey {
    /// Builds a key.
    #[must_use]
    pub fn new(hostname: &str, domain_name: Option<&str>) -> Self {
        Self {
            hostname: hostname.to_string(),
            domain_name: domain_name.map(str::to_string),
        }
    }
}
