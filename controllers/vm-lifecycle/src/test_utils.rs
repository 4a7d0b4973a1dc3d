//! Test utilities for lifecycle tests
//!
//! Builders for VirtualMachine/VirtualMachineInstance fixtures and a
//! lifecycle wired to the mock client.

#[cfg(test)]
use crate::config::LifecycleConfig;
#[cfg(test)]
use crate::lifecycle::Lifecycle;
#[cfg(test)]
use crate::record::{DiskConfig, InterfaceType, NetworkInterfaceConfig, VirtualMachineRecord};
#[cfg(test)]
use kubevirt_client::MockKubevirtClient;
#[cfg(test)]
use kubevirt_crds::*;
#[cfg(test)]
use std::sync::Arc;
#[cfg(test)]
use std::time::Duration;

/// Timeout used by lifecycle tests for every wait
#[cfg(test)]
pub const TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Helper to create a VirtualMachine with the given readiness
#[cfg(test)]
pub fn test_vm(name: &str, ready: bool) -> VirtualMachine {
    let mut vm = VirtualMachine::new(name, VirtualMachineSpec::default());
    vm.status = Some(VirtualMachineStatus {
        ready,
        created: true,
        printable_status: Some(if ready { "Running" } else { "Starting" }.to_string()),
    });
    vm
}

/// Helper to create a VirtualMachineInstance reporting `(interface, address)` pairs
#[cfg(test)]
pub fn test_vmi(name: &str, interfaces: &[(&str, &str)]) -> VirtualMachineInstance {
    let mut vmi = VirtualMachineInstance::new(name, VirtualMachineInstanceSpec::default());
    vmi.status = Some(VirtualMachineInstanceStatus {
        phase: Some("Running".to_string()),
        node_name: Some("node-1".to_string()),
        interfaces: interfaces
            .iter()
            .map(|(iface, address)| InstanceNetworkInterface {
                name: iface.to_string(),
                ip_address: address.to_string(),
                mac: Some("52:54:00:12:34:56".to_string()),
                ..Default::default()
            })
            .collect(),
    });
    vmi
}

/// Helper to create a PVC-backed volume
#[cfg(test)]
pub fn pvc_volume(name: &str, claim: &str) -> Volume {
    Volume {
        name: name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.to_string(),
            read_only: None,
        }),
        ..Default::default()
    }
}

/// Helper to create a record with optional lease-waiting interfaces
#[cfg(test)]
pub fn test_record(name: &str, lease_interfaces: &[&str]) -> VirtualMachineRecord {
    let mut record = VirtualMachineRecord::new("default", name);
    for iface in lease_interfaces {
        record.network_interfaces.push(NetworkInterfaceConfig {
            name: iface.to_string(),
            network_name: "default/vlan10".to_string(),
            model: "virtio".to_string(),
            interface_type: InterfaceType::Bridge,
            mac_address: None,
            wait_for_lease: true,
        });
    }
    record
}

/// Helper to create a PVC disk entry
#[cfg(test)]
pub fn test_disk(name: &str, claim: &str, auto_delete: bool) -> DiskConfig {
    DiskConfig {
        name: name.to_string(),
        bus: "virtio".to_string(),
        boot_order: None,
        existing_volume_name: Some(claim.to_string()),
        container_image_name: None,
        auto_delete,
    }
}

/// Helper to create a lifecycle on top of a mock client
#[cfg(test)]
pub fn create_test_lifecycle(client: &MockKubevirtClient) -> Lifecycle {
    let mut config = LifecycleConfig::with_timeouts(TEST_TIMEOUT);
    config.conflict_retries = 2;
    Lifecycle::new(Arc::new(client.clone()), config)
}
