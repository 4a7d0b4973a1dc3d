//! VM configuration record.
//!
//! The record is the declarative input of every lifecycle operation and the
//! place where observed state is written back. It round-trips through YAML
//! so the CLI can load it from a file and print it after the operation.

use crate::error::LifecycleError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

/// Namespace used when an id carries no namespace part.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Declarative description of one managed VirtualMachine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineRecord {
    /// `namespace/name` of the managed object, `None` once cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Extra labels, stored under the tag label prefix.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    /// CPU cores
    #[serde(default = "default_cpu")]
    pub cpu: u32,

    /// Guest memory as a Kubernetes quantity (e.g. "2Gi")
    #[serde(default = "default_memory")]
    pub memory: String,

    #[serde(default)]
    pub run_strategy: RunStrategy,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<NetworkInterfaceConfig>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_init: Option<CloudInitConfig>,

    /// Observed state, written by the handler
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<ObservedState>,
}

/// VirtualMachine run strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStrategy {
    #[default]
    Always,
    RerunOnFailure,
    Manual,
    Halted,
}

impl RunStrategy {
    /// Value as written into `spec.runStrategy`.
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStrategy::Always => "Always",
            RunStrategy::RerunOnFailure => "RerunOnFailure",
            RunStrategy::Manual => "Manual",
            RunStrategy::Halted => "Halted",
        }
    }
}

/// How an interface is bound to its network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceType {
    #[default]
    Bridge,
    Masquerade,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkInterfaceConfig {
    pub name: String,

    /// Multus network attachment, empty for the pod network
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub network_name: String,

    #[serde(default = "default_virtio")]
    pub model: String,

    #[serde(default)]
    pub interface_type: InterfaceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    /// Create waits until this interface reports an address
    #[serde(default)]
    pub wait_for_lease: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    pub name: String,

    #[serde(default = "default_virtio")]
    pub bus: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boot_order: Option<u32>,

    /// Existing PVC backing the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub existing_volume_name: Option<String>,

    /// Container image backing the disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_image_name: Option<String>,

    /// Delete the backing claim together with the VM
    #[serde(default = "default_true")]
    pub auto_delete: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudInitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_data: Option<String>,
}

/// State observed on the cluster at the last successful read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedState {
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub network_interfaces: Vec<InterfaceState>,

    pub last_synced: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceState {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ip_address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

fn default_cpu() -> u32 {
    1
}

fn default_memory() -> String {
    "1Gi".to_string()
}

fn default_virtio() -> String {
    "virtio".to_string()
}

fn default_true() -> bool {
    true
}

/// Build the `namespace/name` id of a managed object.
pub fn build_id(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Split an id into namespace and name.
///
/// A bare name belongs to the default namespace.
pub fn id_parts(id: &str) -> Result<(String, String), LifecycleError> {
    let parts: Vec<&str> = id.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((DEFAULT_NAMESPACE.to_string(), name.to_string())),
        [namespace, name] if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace.to_string(), name.to_string()))
        }
        _ => Err(LifecycleError::InvalidId(format!(
            "'{}' is not of the form namespace/name",
            id
        ))),
    }
}

impl VirtualMachineRecord {
    /// Minimal record for a VM with default sizing.
    #[cfg(test)]
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            id: None,
            namespace: namespace.to_string(),
            name: name.to_string(),
            description: None,
            tags: BTreeMap::new(),
            cpu: default_cpu(),
            memory: default_memory(),
            run_strategy: RunStrategy::default(),
            machine_type: None,
            hostname: None,
            network_interfaces: Vec::new(),
            disks: Vec::new(),
            cloud_init: None,
            state: None,
        }
    }

    /// Load a record from a YAML file.
    pub fn load(path: &Path) -> Result<Self, LifecycleError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&raw)?)
    }

    /// Namespace and name of the managed object, from the id.
    pub fn identity(&self) -> Result<(String, String), LifecycleError> {
        match &self.id {
            Some(id) => id_parts(id),
            None => Err(LifecycleError::InvalidId(format!(
                "record for VM {} has no id",
                self.name
            ))),
        }
    }

    /// Forget the managed object.
    pub fn clear(&mut self) {
        self.id = None;
        self.state = None;
    }

    /// Interface names create has to wait a lease for.
    pub fn lease_interfaces(&self) -> BTreeSet<String> {
        self.network_interfaces
            .iter()
            .filter(|iface| iface.wait_for_lease && !iface.name.is_empty())
            .map(|iface| iface.name.clone())
            .collect()
    }

    /// Configured auto-delete flag per disk name.
    pub fn auto_delete_flags(&self) -> HashMap<String, bool> {
        self.disks
            .iter()
            .map(|disk| (disk.name.clone(), disk.auto_delete))
            .collect()
    }

    /// Reject records the builder cannot turn into a VM.
    pub fn validate(&self) -> Result<(), LifecycleError> {
        if self.name.is_empty() {
            return Err(LifecycleError::InvalidRecord("name must not be empty".to_string()));
        }
        if self.namespace.is_empty() {
            return Err(LifecycleError::InvalidRecord(format!(
                "namespace of VM {} must not be empty",
                self.name
            )));
        }
        if self.name.contains('/') || self.namespace.contains('/') {
            return Err(LifecycleError::InvalidRecord(format!(
                "'{}/{}' contains '/' in namespace or name",
                self.namespace, self.name
            )));
        }
        if self.cpu == 0 {
            return Err(LifecycleError::InvalidRecord(format!(
                "VM {} needs at least one CPU",
                self.name
            )));
        }
        if self.memory.trim().is_empty() {
            return Err(LifecycleError::InvalidRecord(format!(
                "VM {} has no memory size",
                self.name
            )));
        }

        let mut interfaces = BTreeSet::new();
        for iface in &self.network_interfaces {
            if iface.name.is_empty() {
                return Err(LifecycleError::InvalidRecord(format!(
                    "VM {} has a network interface without a name",
                    self.name
                )));
            }
            if !interfaces.insert(iface.name.as_str()) {
                return Err(LifecycleError::InvalidRecord(format!(
                    "duplicate network interface '{}'",
                    iface.name
                )));
            }
        }

        let mut disks = BTreeSet::new();
        for disk in &self.disks {
            if disk.name.is_empty() {
                return Err(LifecycleError::InvalidRecord(format!(
                    "VM {} has a disk without a name",
                    self.name
                )));
            }
            if !disks.insert(disk.name.as_str()) {
                return Err(LifecycleError::InvalidRecord(format!(
                    "duplicate disk '{}'",
                    disk.name
                )));
            }
            match (&disk.existing_volume_name, &disk.container_image_name) {
                (Some(_), None) | (None, Some(_)) => {}
                _ => {
                    return Err(LifecycleError::InvalidRecord(format!(
                        "disk '{}' needs exactly one of existing_volume_name or container_image_name",
                        disk.name
                    )));
                }
            }
        }

        Ok(())
    }
}
