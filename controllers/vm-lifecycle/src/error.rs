//! Handler-specific error types.
//!
//! This module defines the errors a lifecycle operation can end with. Each
//! failed operation surfaces exactly one of them.

use kubevirt_client::KubevirtError;
use thiserror::Error;

/// Errors that can occur in a lifecycle operation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Cluster API or transport error, passed through unchanged
    #[error(transparent)]
    Client(#[from] KubevirtError),

    /// VM did not report ready before the create timeout
    #[error("Timeout waiting for VM {name} to be created")]
    ReadyTimeout { name: String },

    /// Not every lease-waiting interface got an address before the lease timeout
    #[error("Timeout waiting for VM {name} to get IP address")]
    LeaseTimeout { name: String },

    /// No deletion event before the delete timeout
    #[error("timeout waiting for virtualmachine {id} to be deleted")]
    DeleteTimeout { id: String },

    /// Malformed `namespace/name` identifier
    #[error("Invalid resource id: {0}")]
    InvalidId(String),

    /// Record fails validation
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Record file could not be read or written
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record file is not valid YAML for a VM record
    #[error("Record serialization error: {0}")]
    Serialization(#[from] serde_yaml::Error),

    /// JSON conversion of an object or patch failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LifecycleError {
    /// Whether this is one of the three wait timeouts.
    #[cfg(test)]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            LifecycleError::ReadyTimeout { .. }
                | LifecycleError::LeaseTimeout { .. }
                | LifecycleError::DeleteTimeout { .. }
        )
    }
}
