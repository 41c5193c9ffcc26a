//! Error types for hostrecon.
//!
//! All errors are strongly typed using thiserror so callers can tell a
//! rejected submission from a missing host or a failing store.

use thiserror::Error;

use crate::host::HostId;
use crate::storage::StorageError;

/// Validation errors. A submission failing validation is rejected before
/// any mutation reaches the store.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Submission contains no records")]
    EmptyBatch,

    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("'{address}' is not a valid IPv4 or IPv6 address")]
    InvalidAddress {
        address: String,
    },

    #[error("No user named '{username}' exists")]
    UnknownOwner {
        username: String,
    },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        reason: String,
    },
}

/// Execution errors that occur while a submission is applied.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Host not found: {id}")]
    HostNotFound {
        id: HostId,
    },

    #[error("Address {address} already belongs to another host")]
    AddressInUse {
        address: String,
    },

    #[error("Storage error: {message}")]
    Storage {
        message: String,
    },

    #[error("Request queue is full (capacity {capacity})")]
    QueueFull {
        capacity: usize,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for hostrecon.
#[derive(Debug, Error)]
pub enum ReconError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl ReconError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Maps a store failure into the engine's error space.
    ///
    /// A missing host keeps its meaning; everything else is reported as a storage failure.
    #[must_use]
    pub fn storage(err: StorageError) -> Self {
        match err {
            StorageError::HostNotFound(id) => Self::Execution(ExecutionError::HostNotFound { id }),
            other => Self::Execution(ExecutionError::Storage {
                message: other.to_string(),
            }),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if the target host does not exist (or was changed concurrently).
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::HostNotFound { .. }))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if resubmitting the same request may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) => false,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
            Self::Internal { .. } => false,
        }
    }
}

/// Result type alias for hostrecon operations.
pub type ReconResult<T> = Result<T, ReconError>;
