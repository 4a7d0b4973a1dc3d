//! VirtualMachineInstance CRD
//!
//! The live, per-boot counterpart of a `VirtualMachine`. Its status reports
//! the running phase and the addresses the guest interfaces obtained.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::domain::{DomainSpec, Network, Volume};

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    shortname = "vmi",
    namespaced,
    status = "VirtualMachineInstanceStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceSpec {
    /// Guest hardware
    pub domain: DomainSpec,

    /// Networks the interfaces are bound to (matched by name)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<Network>,

    /// Volumes the disks are backed by (matched by name)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,

    /// Guest hostname
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// Eviction strategy (e.g. "LiveMigrate")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_strategy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    /// Lifecycle phase ("Pending", "Scheduled", "Running", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    /// Node the instance is scheduled on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Interfaces reported by the guest agent or the network binding
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<InstanceNetworkInterface>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceNetworkInterface {
    /// Name of the spec interface this entry belongs to
    #[serde(default)]
    pub name: String,

    /// Primary address, empty until a lease is obtained
    #[serde(default, rename = "ipAddress")]
    pub ip_address: String,

    #[serde(default, rename = "ipAddresses", skip_serializing_if = "Vec::is_empty")]
    pub ip_addresses: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// Interface name inside the guest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface_name: Option<String>,
}

impl InstanceNetworkInterface {
    /// Whether the interface has been assigned an address.
    pub fn has_address(&self) -> bool {
        !self.ip_address.is_empty()
    }
}

impl VirtualMachineInstance {
    /// Interfaces reported in status, empty when no status was observed yet.
    pub fn reported_interfaces(&self) -> &[InstanceNetworkInterface] {
        self.status
            .as_ref()
            .map(|s| s.interfaces.as_slice())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_deserializes_kubevirt_field_names() {
        let status: VirtualMachineInstanceStatus = serde_json::from_value(serde_json::json!({
            "phase": "Running",
            "nodeName": "node-1",
            "interfaces": [
                {"name": "net0", "ipAddress": "10.0.0.5", "ipAddresses": ["10.0.0.5"], "mac": "52:54:00:00:00:01"},
                {"name": "net1"}
            ],
            "guestOSInfo": {"id": "ubuntu"}
        }))
        .unwrap();

        assert_eq!(status.node_name.as_deref(), Some("node-1"));
        assert_eq!(status.interfaces.len(), 2);
        assert!(status.interfaces[0].has_address());
        assert!(!status.interfaces[1].has_address(), "Missing ipAddress should read as empty");
    }

    #[test]
    fn test_reported_interfaces_without_status() {
        let vmi = VirtualMachineInstance::new("vm1", VirtualMachineInstanceSpec::default());
        assert!(vmi.reported_interfaces().is_empty());
    }
}
