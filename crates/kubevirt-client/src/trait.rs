//! VirtualMachineClient trait for mocking
//!
//! This trait abstracts the cluster client so the lifecycle handler can be
//! unit tested against an in-memory implementation.

use async_trait::async_trait;
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};

use crate::error::KubevirtError;
use crate::models::{DeletePropagation, EventStream, WatchRequest};

/// Trait for KubeVirt API operations
///
/// All objects are namespaced and keyed by name. All async methods must be
/// `Send` to work with Tokio's work-stealing runtime.
#[async_trait]
pub trait VirtualMachineClientTrait: Send + Sync {
    // VirtualMachine operations
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, KubevirtError>;
    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, KubevirtError>;

    /// Apply a JSON merge patch. A `metadata.resourceVersion` in the patch
    /// makes the write fail with [`KubevirtError::Conflict`] if the object
    /// changed in the meantime.
    async fn patch_virtual_machine(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<VirtualMachine, KubevirtError>;
    async fn delete_virtual_machine(&self, namespace: &str, name: &str, propagation: DeletePropagation) -> Result<(), KubevirtError>;

    /// Open a watch. Fails immediately if the subscription cannot be
    /// established; the returned stream ends when the server-side timeout
    /// elapses.
    async fn watch_virtual_machines(&self, namespace: &str, request: &WatchRequest) -> Result<EventStream<VirtualMachine>, KubevirtError>;

    // VirtualMachineInstance operations
    async fn get_virtual_machine_instance(&self, namespace: &str, name: &str) -> Result<VirtualMachineInstance, KubevirtError>;
    async fn watch_virtual_machine_instances(&self, namespace: &str, request: &WatchRequest) -> Result<EventStream<VirtualMachineInstance>, KubevirtError>;
}
