//! KubeVirt client errors

use thiserror::Error;

/// Errors that can occur when talking to the cluster
#[derive(Debug, Error)]
pub enum KubevirtError {
    /// Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[source] kube::Error),

    /// Requested object does not exist (HTTP 404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object changed since it was read, or already exists (HTTP 409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Watch stream reported an in-band error
    #[error("Watch error: {0}")]
    Watch(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl KubevirtError {
    /// Whether the error means the object is absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, KubevirtError::NotFound(_))
    }

    /// Whether the error is an optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubevirtError::Conflict(_))
    }
}

impl From<kube::Error> for KubevirtError {
    fn from(error: kube::Error) -> Self {
        match error {
            kube::Error::Api(ref response) if response.code == 404 => {
                KubevirtError::NotFound(response.message.clone())
            }
            kube::Error::Api(ref response) if response.code == 409 => {
                KubevirtError::Conflict(response.message.clone())
            }
            other => KubevirtError::Kube(other),
        }
    }
}
