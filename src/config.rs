//! Engine configuration.
//!
//! Every field has a default, so a config file only needs the keys it changes:
//!
//! ```json
//! { "batch_policy": "matched_only", "notifier": { "stream_capacity": 64 } }
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ReconResult, ValidationError};

/// How a host batch is split into writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
    /// Every record is merged or inserted on its own.
    #[default]
    PerRecord,
    /// If any record matches a stored host, only matched records are written
    /// and the rest of the batch is dropped. Otherwise all records are inserted.
    MatchedOnly,
}

/// How an incoming service list is applied to a stored host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMergeMode {
    /// Diff by `(port, protocol)`: matching services keep their ids.
    #[default]
    Diff,
    /// Replace the whole list; every service gets a fresh id.
    Replace,
}

/// What happens when a host names an owner that does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerPolicy {
    /// Store the host unowned and report the name.
    #[default]
    Warn,
    /// Reject the submission.
    Reject,
}

/// Change notifier queue sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// Max queued events before `publish` starts dropping.
    pub event_queue_capacity: usize,
    /// Max queued control messages (subscribe/unsubscribe).
    pub control_queue_capacity: usize,
    /// Per-subscriber buffer.
    pub stream_capacity: usize,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: 4096,
            control_queue_capacity: 1024,
            stream_capacity: 1024,
        }
    }
}

/// Request worker pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads.
    pub workers: usize,
    /// Max queued requests before `submit` fails with `QueueFull`.
    pub queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            queue_capacity: 1024,
        }
    }
}

/// Top-level engine configuration.
#[allow(missing_docs)]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub batch_policy: BatchPolicy,
    pub service_merge: ServiceMergeMode,
    pub owner_policy: OwnerPolicy,
    pub notifier: NotifierConfig,
    pub runtime: RuntimeConfig,
}

fn invalid(reason: impl Into<String>) -> ValidationError {
    ValidationError::InvalidConfig {
        reason: reason.into(),
    }
}

impl EngineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json_str(json: &str) -> ReconResult<Self> {
        let cfg: Self = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        Ok(cfg.validate()?)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_file(path: impl AsRef<Path>) -> ReconResult<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .map_err(|e| invalid(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    /// Check capacities and worker counts.
    ///
    /// # Errors
    /// `InvalidConfig` naming the first zero-valued setting.
    pub fn validate(self) -> Result<Self, ValidationError> {
        let checks = [
            ("notifier.event_queue_capacity", self.notifier.event_queue_capacity),
            ("notifier.control_queue_capacity", self.notifier.control_queue_capacity),
            ("notifier.stream_capacity", self.notifier.stream_capacity),
            ("runtime.workers", self.runtime.workers),
            ("runtime.queue_capacity", self.runtime.queue_capacity),
        ];
        if let Some((name, _)) = checks.iter().find(|(_, v)| *v == 0) {
            return Err(invalid(format!("{name} must be greater than zero")));
        }
        Ok(self)
    }
}
