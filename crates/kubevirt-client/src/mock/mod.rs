//! Mock KubevirtClient for unit testing
//!
//! This module provides an in-memory implementation of
//! [`VirtualMachineClientTrait`] so the lifecycle handler can be tested
//! without a cluster.
//!
//! - `helpers.rs` - merge patch application and store bookkeeping
//! - `watch.rs` - scripted watch streams

mod helpers;
mod watch;

use async_trait::async_trait;
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::client_trait::VirtualMachineClientTrait;
use crate::error::KubevirtError;
use crate::models::{DeletePropagation, EventStream, ResourceEvent, WatchRequest};

use helpers::lock;
pub use watch::WatchScript;

type ObjectKey = (String, String);

/// Operation kinds, used to inject failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    GetVirtualMachine,
    CreateVirtualMachine,
    PatchVirtualMachine,
    DeleteVirtualMachine,
    WatchVirtualMachines,
    GetVirtualMachineInstance,
    WatchVirtualMachineInstances,
}

/// A call received by the mock, in arrival order
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    GetVirtualMachine { namespace: String, name: String },
    CreateVirtualMachine { namespace: String, name: String },
    PatchVirtualMachine { namespace: String, name: String, patch: serde_json::Value },
    DeleteVirtualMachine { namespace: String, name: String, propagation: DeletePropagation },
    WatchVirtualMachines { namespace: String, request: WatchRequest },
    GetVirtualMachineInstance { namespace: String, name: String },
    WatchVirtualMachineInstances { namespace: String, request: WatchRequest },
}

impl MockCall {
    pub fn operation(&self) -> MockOperation {
        match self {
            MockCall::GetVirtualMachine { .. } => MockOperation::GetVirtualMachine,
            MockCall::CreateVirtualMachine { .. } => MockOperation::CreateVirtualMachine,
            MockCall::PatchVirtualMachine { .. } => MockOperation::PatchVirtualMachine,
            MockCall::DeleteVirtualMachine { .. } => MockOperation::DeleteVirtualMachine,
            MockCall::WatchVirtualMachines { .. } => MockOperation::WatchVirtualMachines,
            MockCall::GetVirtualMachineInstance { .. } => MockOperation::GetVirtualMachineInstance,
            MockCall::WatchVirtualMachineInstances { .. } => MockOperation::WatchVirtualMachineInstances,
        }
    }
}

/// Mock KubevirtClient for testing
///
/// Objects live in memory. Watches replay scripts queued with
/// [`MockKubevirtClient::script_vm_watch`] and friends, one script per
/// opened watch; a watch without a queued script ends immediately.
/// Replayed events are written back to the store, standing in for the
/// control plane.
#[derive(Clone, Default)]
pub struct MockKubevirtClient {
    pub(crate) vms: Arc<Mutex<HashMap<ObjectKey, VirtualMachine>>>,
    pub(crate) vmis: Arc<Mutex<HashMap<ObjectKey, VirtualMachineInstance>>>,
    pub(crate) vm_watches: Arc<Mutex<VecDeque<WatchScript<VirtualMachine>>>>,
    pub(crate) vmi_watches: Arc<Mutex<VecDeque<WatchScript<VirtualMachineInstance>>>>,
    pub(crate) failures: Arc<Mutex<HashMap<MockOperation, VecDeque<KubevirtError>>>>,
    pub(crate) calls: Arc<Mutex<Vec<MockCall>>>,
    // Counter for generating resource versions
    pub(crate) next_version: Arc<Mutex<u64>>,
}

impl MockKubevirtClient {
    /// Create a new, empty mock client
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a VirtualMachine to the mock store (for test setup)
    pub fn add_virtual_machine(&self, namespace: &str, mut vm: VirtualMachine) {
        let name = vm.metadata.name.clone().unwrap_or_default();
        vm.metadata.namespace = Some(namespace.to_string());
        vm.metadata.resource_version = Some(self.next_version());
        lock(&self.vms).insert((namespace.to_string(), name), vm);
    }

    /// Add a VirtualMachineInstance to the mock store (for test setup)
    pub fn add_virtual_machine_instance(&self, namespace: &str, mut vmi: VirtualMachineInstance) {
        let name = vmi.metadata.name.clone().unwrap_or_default();
        vmi.metadata.namespace = Some(namespace.to_string());
        vmi.metadata.resource_version = Some(self.next_version());
        lock(&self.vmis).insert((namespace.to_string(), name), vmi);
    }

    /// Current stored VirtualMachine, if any
    pub fn virtual_machine(&self, namespace: &str, name: &str) -> Option<VirtualMachine> {
        lock(&self.vms)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    /// Bump the stored resource version, simulating a concurrent writer
    pub fn touch_virtual_machine(&self, namespace: &str, name: &str) {
        let version = self.next_version();
        if let Some(vm) = lock(&self.vms).get_mut(&(namespace.to_string(), name.to_string())) {
            vm.metadata.resource_version = Some(version);
        }
    }

    /// Queue the events the next VirtualMachine watch replays before closing
    pub fn script_vm_watch(&self, events: Vec<ResourceEvent<VirtualMachine>>) {
        lock(&self.vm_watches).push_back(WatchScript::closing(events));
    }

    /// Queue events for the next VirtualMachine watch, which then stays open
    pub fn script_vm_watch_held_open(&self, events: Vec<ResourceEvent<VirtualMachine>>) {
        lock(&self.vm_watches).push_back(WatchScript::held_open(events));
    }

    /// Queue the events the next VirtualMachineInstance watch replays before closing
    pub fn script_vmi_watch(&self, events: Vec<ResourceEvent<VirtualMachineInstance>>) {
        lock(&self.vmi_watches).push_back(WatchScript::closing(events));
    }

    /// Queue events for the next VirtualMachineInstance watch, which then stays open
    pub fn script_vmi_watch_held_open(&self, events: Vec<ResourceEvent<VirtualMachineInstance>>) {
        lock(&self.vmi_watches).push_back(WatchScript::held_open(events));
    }

    /// Make the next call of `operation` fail with `error`
    pub fn fail_next(&self, operation: MockOperation, error: KubevirtError) {
        lock(&self.failures).entry(operation).or_default().push_back(error);
    }

    /// All calls received so far
    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.calls).clone()
    }

    /// Number of calls of the given kind
    pub fn call_count(&self, operation: MockOperation) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.operation() == operation)
            .count()
    }

    /// Generate next resource version
    pub(crate) fn next_version(&self) -> String {
        let mut version = lock(&self.next_version);
        *version += 1;
        version.to_string()
    }

    /// Record the call and return an injected failure if one is queued
    fn record(&self, call: MockCall) -> Result<(), KubevirtError> {
        let operation = call.operation();
        lock(&self.calls).push(call);
        match lock(&self.failures).get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl VirtualMachineClientTrait for MockKubevirtClient {
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, KubevirtError> {
        self.record(MockCall::GetVirtualMachine {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        self.virtual_machine(namespace, name).ok_or_else(|| {
            KubevirtError::NotFound(format!("virtualmachines.kubevirt.io \"{}\" not found", name))
        })
    }

    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, KubevirtError> {
        let name = vm
            .metadata
            .name
            .clone()
            .ok_or_else(|| KubevirtError::InvalidRequest("VirtualMachine missing name".to_string()))?;
        self.record(MockCall::CreateVirtualMachine {
            namespace: namespace.to_string(),
            name: name.clone(),
        })?;

        let key = (namespace.to_string(), name.clone());
        if lock(&self.vms).contains_key(&key) {
            return Err(KubevirtError::Conflict(format!(
                "virtualmachines.kubevirt.io \"{}\" already exists",
                name
            )));
        }

        let mut created = vm.clone();
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.resource_version = Some(self.next_version());
        created.metadata.uid = Some(format!("uid-{}-{}", namespace, name));
        lock(&self.vms).insert(key, created.clone());
        Ok(created)
    }

    async fn patch_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<VirtualMachine, KubevirtError> {
        self.record(MockCall::PatchVirtualMachine {
            namespace: namespace.to_string(),
            name: name.to_string(),
            patch: patch.clone(),
        })?;

        let key = (namespace.to_string(), name.to_string());
        let current = lock(&self.vms).get(&key).cloned().ok_or_else(|| {
            KubevirtError::NotFound(format!("virtualmachines.kubevirt.io \"{}\" not found", name))
        })?;
        helpers::check_resource_version(&current.metadata, patch)?;

        let mut patched: VirtualMachine = helpers::apply_merge_patch(&current, patch)?;
        patched.metadata.resource_version = Some(self.next_version());
        lock(&self.vms).insert(key, patched.clone());
        Ok(patched)
    }

    async fn delete_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), KubevirtError> {
        self.record(MockCall::DeleteVirtualMachine {
            namespace: namespace.to_string(),
            name: name.to_string(),
            propagation,
        })?;

        let key = (namespace.to_string(), name.to_string());
        lock(&self.vms).remove(&key).map(|_| ()).ok_or_else(|| {
            KubevirtError::NotFound(format!("virtualmachines.kubevirt.io \"{}\" not found", name))
        })?;
        if propagation != DeletePropagation::Orphan {
            lock(&self.vmis).remove(&key);
        }
        Ok(())
    }

    async fn watch_virtual_machines(
        &self,
        namespace: &str,
        request: &WatchRequest,
    ) -> Result<EventStream<VirtualMachine>, KubevirtError> {
        self.record(MockCall::WatchVirtualMachines {
            namespace: namespace.to_string(),
            request: request.clone(),
        })?;
        let script = lock(&self.vm_watches).pop_front().unwrap_or_default();
        Ok(script.into_stream(&request.field_selector, namespace, Arc::clone(&self.vms)))
    }

    async fn get_virtual_machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachineInstance, KubevirtError> {
        self.record(MockCall::GetVirtualMachineInstance {
            namespace: namespace.to_string(),
            name: name.to_string(),
        })?;
        lock(&self.vmis)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| {
                KubevirtError::NotFound(format!(
                    "virtualmachineinstances.kubevirt.io \"{}\" not found",
                    name
                ))
            })
    }

    async fn watch_virtual_machine_instances(
        &self,
        namespace: &str,
        request: &WatchRequest,
    ) -> Result<EventStream<VirtualMachineInstance>, KubevirtError> {
        self.record(MockCall::WatchVirtualMachineInstances {
            namespace: namespace.to_string(),
            request: request.clone(),
        })?;
        let script = lock(&self.vmi_watches).pop_front().unwrap_or_default();
        Ok(script.into_stream(&request.field_selector, namespace, Arc::clone(&self.vmis)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use kubevirt_crds::VirtualMachineSpec;
    use std::time::Duration;

    fn vm(name: &str) -> VirtualMachine {
        VirtualMachine::new(name, VirtualMachineSpec::default())
    }

    #[tokio::test]
    async fn test_get_missing_vm_is_not_found() {
        let client = MockKubevirtClient::new();
        let err = client.get_virtual_machine("default", "vm1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let client = MockKubevirtClient::new();
        client.create_virtual_machine("default", &vm("vm1")).await.unwrap();
        let err = client.create_virtual_machine("default", &vm("vm1")).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_patch_with_stale_version_conflicts() {
        let client = MockKubevirtClient::new();
        let created = client.create_virtual_machine("default", &vm("vm1")).await.unwrap();
        let version = created.metadata.resource_version.clone().unwrap();

        client.touch_virtual_machine("default", "vm1");

        let patch = serde_json::json!({
            "metadata": {"resourceVersion": version, "annotations": {"a": "b"}}
        });
        let err = client.patch_virtual_machine("default", "vm1", &patch).await.unwrap_err();
        assert!(err.is_conflict(), "Stale resourceVersion should conflict, got {}", err);
    }

    #[tokio::test]
    async fn test_patch_merges_annotations() {
        let client = MockKubevirtClient::new();
        client.create_virtual_machine("default", &vm("vm1")).await.unwrap();

        let patch = serde_json::json!({"metadata": {"annotations": {"a": "b"}}});
        let patched = client.patch_virtual_machine("default", "vm1", &patch).await.unwrap();

        let annotations = patched.metadata.annotations.unwrap();
        assert_eq!(annotations.get("a").map(String::as_str), Some("b"));
    }

    #[tokio::test]
    async fn test_injected_failure_is_returned_once() {
        let client = MockKubevirtClient::new();
        client.fail_next(
            MockOperation::WatchVirtualMachines,
            KubevirtError::Watch("forbidden".to_string()),
        );

        let request = WatchRequest::for_name("vm1", Duration::from_secs(1));
        assert!(client.watch_virtual_machines("default", &request).await.is_err());
        assert!(client.watch_virtual_machines("default", &request).await.is_ok());
        assert_eq!(client.call_count(MockOperation::WatchVirtualMachines), 2);
    }

    #[tokio::test]
    async fn test_scripted_watch_filters_by_name() {
        let client = MockKubevirtClient::new();
        client.script_vm_watch(vec![
            ResourceEvent::Added(vm("other")),
            ResourceEvent::Modified(vm("vm1")),
        ]);

        let request = WatchRequest::for_name("vm1", Duration::from_secs(1));
        let events: Vec<_> = client
            .watch_virtual_machines("default", &request)
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(events.len(), 1, "Only events for vm1 should be delivered");
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.object().metadata.name.as_deref(), Some("vm1"));
    }
}
