//! VirtualMachine CRD
//!
//! The declarative VM object. Its template describes the instance the
//! cluster starts; its status reports whether that instance is ready.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::Volume;
use crate::virtual_machine_instance::VirtualMachineInstanceSpec;

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachine",
    shortname = "vm",
    namespaced,
    status = "VirtualMachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Run strategy ("Always", "RerunOnFailure", "Manual", "Halted")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_strategy: Option<String>,

    /// Instance template
    pub template: VirtualMachineInstanceTemplateSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceTemplateSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<TemplateMetadata>,

    pub spec: VirtualMachineInstanceSpec,
}

/// Subset of object metadata allowed on the instance template
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// Set once the instance is running and its readiness probes pass
    #[serde(default)]
    pub ready: bool,

    /// Set once the instance object exists
    #[serde(default)]
    pub created: bool,

    /// Human readable state ("Starting", "Running", "Stopped", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub printable_status: Option<String>,
}

impl VirtualMachine {
    /// Whether the status reports the VM as ready.
    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Volumes attached through the instance template.
    pub fn volumes(&self) -> &[Volume] {
        &self.spec.template.spec.volumes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PersistentVolumeClaimVolumeSource;

    #[test]
    fn test_is_ready_requires_status() {
        let mut vm = VirtualMachine::new("vm1", VirtualMachineSpec::default());
        assert!(!vm.is_ready(), "VM without status should not be ready");

        vm.status = Some(VirtualMachineStatus {
            ready: true,
            ..Default::default()
        });
        assert!(vm.is_ready());
    }

    #[test]
    fn test_volumes_exposes_claim_names() {
        let mut vm = VirtualMachine::new("vm1", VirtualMachineSpec::default());
        vm.spec.template.spec.volumes = vec![
            Volume {
                name: "rootdisk".to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: "vm1-rootdisk".to_string(),
                    read_only: None,
                }),
                ..Default::default()
            },
            Volume {
                name: "cloudinit".to_string(),
                ..Default::default()
            },
        ];

        let claims: Vec<_> = vm.volumes().iter().filter_map(Volume::claim_name).collect();
        assert_eq!(claims, vec!["vm1-rootdisk"]);
    }

    #[test]
    fn test_spec_serializes_camel_case() {
        let spec = VirtualMachineSpec {
            run_strategy: Some("Always".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["runStrategy"], "Always");
        assert!(value["template"]["spec"]["domain"]["devices"].is_object());
    }
}
