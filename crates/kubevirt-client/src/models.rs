//! Watch and delete request/response types

use futures::stream::BoxStream;
use kube::Resource;
use std::time::Duration;

use crate::error::KubevirtError;

/// Upper bound for the server-side watch timeout.
///
/// The kube client rejects watch timeouts of 295 seconds and above; longer
/// waits are enforced by the caller's own deadline.
pub const MAX_SERVER_WATCH_TIMEOUT_SECS: u32 = 290;

/// Filtered, time-bounded watch on a single kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchRequest {
    /// Field selector, e.g. `metadata.name=vm1`
    pub field_selector: String,

    /// How long the subscription may stay open
    pub timeout: Duration,

    /// Resume after this resource version instead of replaying current state
    pub resource_version: Option<String>,
}

impl WatchRequest {
    /// Watch the object with the given name.
    pub fn for_name(name: &str, timeout: Duration) -> Self {
        Self {
            field_selector: format!("metadata.name={}", name),
            timeout,
            resource_version: None,
        }
    }

    /// Timeout to send to the API server, rounded up to whole seconds.
    pub fn server_timeout_secs(&self) -> u32 {
        let mut secs = self.timeout.as_secs();
        if self.timeout.subsec_nanos() > 0 {
            secs += 1;
        }
        secs.clamp(1, u64::from(MAX_SERVER_WATCH_TIMEOUT_SECS)) as u32
    }
}

/// Change notification for a watched object
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
}

impl<K> ResourceEvent<K> {
    /// The object carried by the event.
    pub fn object(&self) -> &K {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) | ResourceEvent::Deleted(obj) => obj,
        }
    }

    /// Take the object out of the event.
    pub fn into_object(self) -> K {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) | ResourceEvent::Deleted(obj) => obj,
        }
    }

    /// The object for added or modified events, `None` for deletions.
    pub fn applied(&self) -> Option<&K> {
        match self {
            ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) => Some(obj),
            ResourceEvent::Deleted(_) => None,
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, ResourceEvent::Deleted(_))
    }

    /// Resource version of the carried object.
    pub fn resource_version(&self) -> Option<&str>
    where
        K: Resource,
    {
        self.object().meta().resource_version.as_deref()
    }

    /// Event type as the API server names it.
    pub fn kind(&self) -> &'static str {
        match self {
            ResourceEvent::Added(_) => "ADDED",
            ResourceEvent::Modified(_) => "MODIFIED",
            ResourceEvent::Deleted(_) => "DELETED",
        }
    }
}

/// Lazy, finite sequence of watch events. Dropping it closes the watch.
pub type EventStream<K> = BoxStream<'static, Result<ResourceEvent<K>, KubevirtError>>;

/// Propagation policy for deletes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePropagation {
    /// Dependents are removed before the owner disappears
    #[default]
    Foreground,
    Background,
    Orphan,
}
