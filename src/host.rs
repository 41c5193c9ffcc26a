//! Hosts and the services observed on them.
//!
//! A [`Host`] is a discovered network endpoint keyed by its network address.
//! It owns an ordered list of [`Service`]s; services have no identity outside
//! their host.

use serde::{Deserialize, Serialize};

pub use crate::ids::{HostId, ServiceId};
use crate::ids::UserId;

/// A network-facing service observed on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    /// Store-assigned id.
    pub id: ServiceId,
    /// Port number.
    pub port: u16,
    /// Transport or application protocol (e.g. `tcp`).
    pub protocol: Option<String>,
    /// Lifecycle state reported by the scanner (e.g. `open`).
    pub state: Option<String>,
    /// Service name.
    pub name: Option<String>,
    /// Version string.
    pub version: Option<String>,
    /// Script or plugin output associated with the service.
    pub script: Option<String>,
}

impl Service {
    /// The natural key of a service within its host.
    #[must_use]
    pub fn key(&self) -> ServiceKey {
        ServiceKey::new(self.port, self.protocol.as_deref())
    }
}

/// Natural key of a service inside one host: port plus protocol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceKey {
    /// Port number.
    pub port: u16,
    /// Protocol, if reported.
    pub protocol: Option<String>,
}

impl ServiceKey {
    /// Builds a key from a port and an optional protocol.
    #[must_use]
    pub fn new(port: u16, protocol: Option<&str>) -> Self {
        Self {
            port,
            protocol: protocol.map(str::to_string),
        }
    }
}

/// A discovered network endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Store-assigned id.
    pub id: HostId,
    /// Owning user, if any.
    pub owner: Option<UserId>,
    /// Canonical network address. Unique within the inventory.
    pub address: String,
    /// Hostname.
    pub hostname: Option<String>,
    /// Lifecycle state (e.g. `up`).
    pub state: Option<String>,
    /// Free-text comments.
    pub comments: Option<String>,
    /// Assessment standing (e.g. `compromised`, `cleared`).
    pub standing: Option<String>,
    /// Operating system.
    pub os: Option<String>,
    /// Subnet descriptor.
    pub subnet: Option<String>,
    /// Services in submission order.
    pub services: Vec<Service>,
    /// Row version. Starts at 1 and increases by one on every stored update.
    pub version: u64,
}

impl Host {
    /// Returns true if both hosts hold the same content, ignoring the row version.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.address == other.address
            && self.hostname == other.hostname
            && self.state == other.state
            && self.comments == other.comments
            && self.standing == other.standing
            && self.os == other.os
            && self.subnet == other.subnet
            && self.services == other.services
    }
}
