//! Change events broadcast after a commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::record::HostRecord;

/// Unique identifier for a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Create a new random event id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// What changed.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Stored hosts were merged with batch records. Carries the post-merge view.
    HostsUpgraded { records: Vec<HostRecord> },

    /// New hosts were inserted. Subscribers re-query to see them.
    HostsAdded,

    /// One host was overwritten through the single-record update path.
    HostUpdated { record: HostRecord },
}

impl EventPayload {
    /// Short name of the event kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::HostsUpgraded { .. } => "hosts_upgraded",
            Self::HostsAdded => "hosts_added",
            Self::HostUpdated { .. } => "host_updated",
        }
    }
}

/// A committed change, as delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Event id.
    pub id: EventId,
    /// Commit that produced the event. Orders events across concurrent batches.
    pub commit_sequence: u64,
    /// When the event was created, right after the commit.
    pub committed_at: DateTime<Utc>,
    /// What changed.
    pub payload: EventPayload,
}

impl ChangeEvent {
    /// Create an event for a commit.
    #[must_use]
    pub fn new(commit_sequence: u64, payload: EventPayload) -> Self {
        Self {
            id: EventId::new(),
            commit_sequence,
            committed_at: Utc::now(),
            payload,
        }
    }
}
