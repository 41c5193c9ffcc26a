//! Wire records submitted by scanning tools and returned by listings.
//!
//! Records use camelCase JSON and accept the uploader's `ip` spelling for the
//! address field. A missing or `null` service list deserializes as empty; a
//! missing or `null` domain asset list means the scanner did not report any.

use std::net::IpAddr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::domain_asset::{DomainAsset, DomainAssetId};
use crate::error::ValidationError;
use crate::host::{Host, HostId, Service, ServiceId};
use crate::ids::UserId;

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Parses an address-shaped identity and returns its canonical textual form.
///
/// # Errors
/// `MissingField` for a blank address, `InvalidAddress` if it is not an IPv4/IPv6 literal.
pub fn canonical_address(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::MissingField {
            field: "address".to_string(),
        });
    }
    trimmed
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| ValidationError::InvalidAddress {
            address: trimmed.to_string(),
        })
}

fn blank_to_none(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// A service observed on a host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecord {
    /// Store id (listings only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ServiceId>,
    /// Owning host id (listings only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_id: Option<HostId>,
    /// Port number.
    pub port: u16,
    /// Protocol.
    #[serde(default)]
    pub protocol: Option<String>,
    /// State.
    #[serde(default)]
    pub state: Option<String>,
    /// Service name.
    #[serde(default)]
    pub name: Option<String>,
    /// Version string.
    #[serde(default)]
    pub version: Option<String>,
    /// Script or plugin output.
    #[serde(default)]
    pub script: Option<String>,
}

impl ServiceRecord {
    /// Canonical view of a stored service.
    #[must_use]
    pub fn from_service(service: &Service, host_id: HostId) -> Self {
        Self {
            id: Some(service.id),
            host_id: Some(host_id),
            port: service.port,
            protocol: service.protocol.clone(),
            state: service.state.clone(),
            name: service.name.clone(),
            version: service.version.clone(),
            script: service.script.clone(),
        }
    }
}

/// A directory-service asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainAssetRecord {
    /// Store id (listings only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<DomainAssetId>,
    /// Explicit host link. Used verbatim when present.
    #[serde(default)]
    pub host_id: Option<HostId>,
    /// Hostname. Required.
    #[serde(default, deserialize_with = "null_as_default")]
    pub hostname: String,
    /// Domain name.
    #[serde(default)]
    pub domain_name: Option<String>,
    /// Distinguished name.
    #[serde(default)]
    pub distinguished_name: Option<String>,
    /// Directory role.
    #[serde(default)]
    pub role: Option<String>,
    /// Network address.
    #[serde(default, alias = "ip")]
    pub address: Option<String>,
    /// Domain controller flag.
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_domain_controller: bool,
    /// Notes.
    #[serde(default)]
    pub notes: Option<String>,
}

impl DomainAssetRecord {
    /// Validates the record and normalizes its address.
    ///
    /// A blank address becomes `None`; an address that parses as an IP literal is
    /// rewritten to canonical form so it can match a host address exactly.
    ///
    /// # Errors
    /// `MissingField("hostname")` when the hostname is blank.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        if self.hostname.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "hostname".to_string(),
            });
        }
        self.address = blank_to_none(self.address).map(|a| canonical_address(&a).unwrap_or(a));
        Ok(self)
    }

    /// Canonical view of a stored asset.
    #[must_use]
    pub fn from_asset(asset: &DomainAsset) -> Self {
        Self {
            id: Some(asset.id),
            host_id: asset.host_id,
            hostname: asset.hostname.clone(),
            domain_name: asset.domain_name.clone(),
            distinguished_name: asset.distinguished_name.clone(),
            role: asset.role.clone(),
            address: asset.address.clone(),
            is_domain_controller: asset.is_domain_controller,
            notes: asset.notes.clone(),
        }
    }
}

/// A host as submitted by a scanner, and as returned by listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRecord {
    /// Store id (listings, and the single-record update path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<HostId>,
    /// Owning user id (listings only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<UserId>,
    /// Owning user name. Resolved against the user directory on insert.
    #[serde(default)]
    pub owner_name: Option<String>,
    /// Network address. Required.
    #[serde(alias = "ip", default, deserialize_with = "null_as_default")]
    pub address: String,
    /// Hostname.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Lifecycle state.
    #[serde(default)]
    pub state: Option<String>,
    /// Comments.
    #[serde(default)]
    pub comments: Option<String>,
    /// Assessment standing.
    #[serde(default)]
    pub standing: Option<String>,
    /// Operating system.
    #[serde(default)]
    pub os: Option<String>,
    /// Subnet descriptor.
    #[serde(default)]
    pub subnet: Option<String>,
    /// Services.
    #[serde(default, deserialize_with = "null_as_default")]
    pub services: Vec<ServiceRecord>,
    /// Domain assets running on this host. The set replaces the host's links;
    /// `None` (absent or `null`) is the empty set. Nested assets always link to
    /// this host.
    #[serde(default)]
    pub domain_assets: Option<Vec<DomainAssetRecord>>,
    /// Row version. On update, the version the caller last read.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl HostRecord {
    /// Creates a record with only an address set.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    /// Validates the record, canonicalizes its address and validates nested assets.
    ///
    /// # Errors
    /// Returns the first validation failure found.
    pub fn validated(mut self) -> Result<Self, ValidationError> {
        self.address = canonical_address(&self.address)?;
        self.owner_name = blank_to_none(self.owner_name);
        self.domain_assets = self
            .domain_assets
            .map(|assets| {
                assets
                    .into_iter()
                    .map(DomainAssetRecord::validated)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?;
        Ok(self)
    }

    /// Canonical view of a stored host.
    #[must_use]
    pub fn from_host(host: &Host, owner_name: Option<String>, assets: &[DomainAsset]) -> Self {
        Self {
            id: Some(host.id),
            owner_id: host.owner,
            owner_name,
            address: host.address.clone(),
            hostname: host.hostname.clone(),
            state: host.state.clone(),
            comments: host.comments.clone(),
            standing: host.standing.clone(),
            os: host.os.clone(),
            subnet: host.subnet.clone(),
            services: host
                .services
                .iter()
                .map(|s| ServiceRecord::from_service(s, host.id))
                .collect(),
            domain_assets: Some(
                assets
                    .iter()
                    .filter(|a| a.host_id == Some(host.id))
                    .map(DomainAssetRecord::from_asset)
                    .collect(),
            ),
            version: Some(host.version),
        }
    }
}
