//! Record to VirtualMachine translation.
//!
//! `build_virtual_machine` creates a fresh object for create, `apply_record`
//! merges the desired record into an object fetched from the cluster, and
//! `update_patch` turns a fetched/desired pair into a version-checked JSON
//! merge patch. The patch only carries what changed, so fields the typed
//! model does not know about are left alone on the server.

use crate::error::LifecycleError;
use crate::record::{InterfaceType, VirtualMachineRecord};
use kubevirt_crds::{
    BindingMethod, CloudInitNoCloudSource, ContainerDiskSource, Disk, DiskTarget, Interface,
    Machine, MultusNetwork, Network, PersistentVolumeClaimVolumeSource, PodNetwork,
    TemplateMetadata, VirtualMachine, VirtualMachineSpec, Volume, DESCRIPTION_ANNOTATION,
    MANAGED_BY_LABEL, MANAGED_BY_VALUE, REMOVED_PVCS_ANNOTATION, TAG_LABEL_PREFIX, VM_NAME_LABEL,
};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Name of the disk and volume carrying cloud-init data.
pub const CLOUD_INIT_DISK: &str = "cloudinitdisk";

/// Build a new VirtualMachine from a record.
pub fn build_virtual_machine(record: &VirtualMachineRecord) -> Result<VirtualMachine, LifecycleError> {
    record.validate()?;

    let mut vm = VirtualMachine::new(&record.name, VirtualMachineSpec::default());
    vm.metadata.namespace = Some(record.namespace.clone());
    apply_record(&mut vm, record);
    Ok(vm)
}

/// Merge the desired record into an existing object.
///
/// Labels and annotations not owned by the record are kept, as is anything
/// in the template the record does not describe (e.g. eviction strategy).
pub fn apply_record(vm: &mut VirtualMachine, record: &VirtualMachineRecord) {
    let labels = vm.metadata.labels.get_or_insert_with(BTreeMap::new);
    labels.retain(|key, _| !key.starts_with(TAG_LABEL_PREFIX));
    for (key, value) in &record.tags {
        labels.insert(format!("{}{}", TAG_LABEL_PREFIX, key), value.clone());
    }
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string());

    match &record.description {
        Some(description) => {
            vm.metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(DESCRIPTION_ANNOTATION.to_string(), description.clone());
        }
        None => {
            if let Some(annotations) = vm.metadata.annotations.as_mut() {
                annotations.remove(DESCRIPTION_ANNOTATION);
            }
        }
    }

    let spec = &mut vm.spec;
    spec.run_strategy = Some(record.run_strategy.as_str().to_string());

    spec.template
        .metadata
        .get_or_insert_with(TemplateMetadata::default)
        .labels
        .insert(VM_NAME_LABEL.to_string(), record.name.clone());

    let instance = &mut spec.template.spec;
    instance.hostname = record.hostname.clone();

    let domain = &mut instance.domain;
    domain.cpu.get_or_insert_with(Default::default).cores = record.cpu;
    domain.memory.get_or_insert_with(Default::default).guest = Some(record.memory.clone());
    domain.machine = record.machine_type.as_ref().map(|machine_type| Machine {
        machine_type: machine_type.clone(),
    });
    let limits = &mut domain.resources.get_or_insert_with(Default::default).limits;
    limits.insert("cpu".to_string(), record.cpu.to_string());
    limits.insert("memory".to_string(), record.memory.clone());

    let (disks, volumes) = storage(record);
    domain.devices.disks = disks;
    instance.volumes = volumes;

    let (interfaces, networks) = networking(record);
    instance.domain.devices.interfaces = interfaces;
    instance.networks = networks;
}

fn storage(record: &VirtualMachineRecord) -> (Vec<Disk>, Vec<Volume>) {
    let mut disks = Vec::with_capacity(record.disks.len() + 1);
    let mut volumes = Vec::with_capacity(record.disks.len() + 1);

    for config in &record.disks {
        disks.push(Disk {
            name: config.name.clone(),
            boot_order: config.boot_order,
            disk: Some(DiskTarget {
                bus: config.bus.clone(),
            }),
        });
        volumes.push(Volume {
            name: config.name.clone(),
            persistent_volume_claim: config.existing_volume_name.as_ref().map(|claim| {
                PersistentVolumeClaimVolumeSource {
                    claim_name: claim.clone(),
                    read_only: None,
                }
            }),
            container_disk: config
                .container_image_name
                .as_ref()
                .map(|image| ContainerDiskSource { image: image.clone() }),
            ..Default::default()
        });
    }

    if let Some(cloud_init) = &record.cloud_init {
        disks.push(Disk {
            name: CLOUD_INIT_DISK.to_string(),
            boot_order: None,
            disk: Some(DiskTarget {
                bus: "virtio".to_string(),
            }),
        });
        volumes.push(Volume {
            name: CLOUD_INIT_DISK.to_string(),
            cloud_init_no_cloud: Some(CloudInitNoCloudSource {
                user_data: cloud_init.user_data.clone(),
                network_data: cloud_init.network_data.clone(),
            }),
            ..Default::default()
        });
    }

    (disks, volumes)
}

fn networking(record: &VirtualMachineRecord) -> (Vec<Interface>, Vec<Network>) {
    record
        .network_interfaces
        .iter()
        .map(|config| {
            let (bridge, masquerade) = match config.interface_type {
                InterfaceType::Bridge => (Some(BindingMethod {}), None),
                InterfaceType::Masquerade => (None, Some(BindingMethod {})),
            };
            let interface = Interface {
                name: config.name.clone(),
                model: Some(config.model.clone()),
                mac_address: config.mac_address.clone(),
                bridge,
                masquerade,
            };
            let network = if config.network_name.is_empty() {
                Network {
                    name: config.name.clone(),
                    pod: Some(PodNetwork {}),
                    multus: None,
                }
            } else {
                Network {
                    name: config.name.clone(),
                    pod: None,
                    multus: Some(MultusNetwork {
                        network_name: config.network_name.clone(),
                    }),
                }
            };
            (interface, network)
        })
        .unzip()
}

/// Claims to delete with the VM.
///
/// Every attached PVC volume is included unless its disk is explicitly
/// configured with `auto_delete: false`.
pub fn removed_claims(vm: &VirtualMachine, auto_delete: &HashMap<String, bool>) -> Vec<String> {
    vm.volumes()
        .iter()
        .filter(|volume| auto_delete.get(&volume.name).copied().unwrap_or(true))
        .filter_map(|volume| volume.claim_name())
        .map(str::to_string)
        .collect()
}

/// Record the claims to delete in the removed-volume annotation.
pub fn mark_removed_claims(vm: &mut VirtualMachine, claims: &[String]) {
    vm.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(REMOVED_PVCS_ANNOTATION.to_string(), claims.join(","));
}

/// JSON merge patch turning `original` into `desired`.
///
/// Carries the original `resourceVersion`, so the API server rejects the
/// write with a conflict if the object changed since it was fetched.
pub fn update_patch(original: &VirtualMachine, desired: &VirtualMachine) -> Result<Value, LifecycleError> {
    let before = managed_fields(original)?;
    let after = managed_fields(desired)?;

    let mut patch = merge_diff(&before, &after).unwrap_or_else(|| json!({}));
    if let Some(version) = &original.metadata.resource_version {
        patch["metadata"]["resourceVersion"] = Value::String(version.clone());
    }
    Ok(patch)
}

fn managed_fields(vm: &VirtualMachine) -> Result<Value, LifecycleError> {
    Ok(json!({
        "metadata": {
            "labels": vm.metadata.labels,
            "annotations": vm.metadata.annotations,
        },
        "spec": serde_json::to_value(&vm.spec)?,
    }))
}

/// RFC 7386 diff: objects recurse, removed keys become null, anything else
/// is replaced wholesale.
fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    match (before, after) {
        (Value::Object(before), Value::Object(after)) => {
            let mut patch = Map::new();
            for (key, value) in after {
                match before.get(key) {
                    Some(old) => {
                        if let Some(diff) = merge_diff(old, value) {
                            patch.insert(key.clone(), diff);
                        }
                    }
                    None if value.is_null() => {}
                    None => {
                        patch.insert(key.clone(), value.clone());
                    }
                }
            }
            for key in before.keys() {
                if !after.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            (!patch.is_empty()).then_some(Value::Object(patch))
        }
        _ if before == after => None,
        _ => Some(after.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CloudInitConfig, DiskConfig, NetworkInterfaceConfig};

    fn test_record() -> VirtualMachineRecord {
        let mut record = VirtualMachineRecord::new("prod", "vm1");
        record.cpu = 2;
        record.memory = "4Gi".to_string();
        record.description = Some("web server".to_string());
        record.tags.insert("team".to_string(), "infra".to_string());
        record.network_interfaces.push(NetworkInterfaceConfig {
            name: "net0".to_string(),
            network_name: "prod/vlan10".to_string(),
            model: "virtio".to_string(),
            interface_type: InterfaceType::Bridge,
            mac_address: None,
            wait_for_lease: true,
        });
        record.network_interfaces.push(NetworkInterfaceConfig {
            name: "pod".to_string(),
            network_name: String::new(),
            model: "e1000".to_string(),
            interface_type: InterfaceType::Masquerade,
            mac_address: Some("52:54:00:00:00:01".to_string()),
            wait_for_lease: false,
        });
        record.disks.push(DiskConfig {
            name: "rootdisk".to_string(),
            bus: "virtio".to_string(),
            boot_order: Some(1),
            existing_volume_name: Some("vm1-rootdisk".to_string()),
            container_image_name: None,
            auto_delete: true,
        });
        record.cloud_init = Some(CloudInitConfig {
            user_data: Some("#cloud-config\n".to_string()),
            network_data: None,
        });
        record
    }

    #[test]
    fn test_build_virtual_machine() {
        let vm = build_virtual_machine(&test_record()).unwrap();

        assert_eq!(vm.metadata.name.as_deref(), Some("vm1"));
        assert_eq!(vm.metadata.namespace.as_deref(), Some("prod"));

        let labels = vm.metadata.labels.as_ref().unwrap();
        assert_eq!(labels.get("tag.harvesterhci.io/team").map(String::as_str), Some("infra"));
        assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(MANAGED_BY_VALUE));
        assert_eq!(
            vm.metadata.annotations.as_ref().unwrap().get(DESCRIPTION_ANNOTATION).map(String::as_str),
            Some("web server")
        );

        assert_eq!(vm.spec.run_strategy.as_deref(), Some("Always"));
        let instance = &vm.spec.template.spec;
        assert_eq!(instance.domain.cpu.as_ref().unwrap().cores, 2);
        assert_eq!(instance.domain.memory.as_ref().unwrap().guest.as_deref(), Some("4Gi"));

        let disk_names: Vec<&str> = instance.domain.devices.disks.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(disk_names, vec!["rootdisk", CLOUD_INIT_DISK]);
        assert_eq!(instance.volumes[0].claim_name(), Some("vm1-rootdisk"));
        assert!(instance.volumes[1].cloud_init_no_cloud.is_some());

        assert!(instance.domain.devices.interfaces[0].bridge.is_some());
        assert!(instance.domain.devices.interfaces[1].masquerade.is_some());
        assert_eq!(
            instance.networks[0].multus.as_ref().map(|m| m.network_name.as_str()),
            Some("prod/vlan10")
        );
        assert!(instance.networks[1].pod.is_some(), "Empty network_name should map to the pod network");
    }

    #[test]
    fn test_build_rejects_invalid_record() {
        let mut record = test_record();
        record.disks[0].container_image_name = Some("image".to_string());
        assert!(matches!(
            build_virtual_machine(&record),
            Err(LifecycleError::InvalidRecord(_))
        ));
    }

    #[test]
    fn test_apply_record_keeps_foreign_metadata() {
        let mut vm = build_virtual_machine(&test_record()).unwrap();
        vm.metadata
            .labels
            .as_mut()
            .unwrap()
            .insert("owner".to_string(), "someone-else".to_string());
        vm.spec.template.spec.eviction_strategy = Some("LiveMigrate".to_string());

        let mut record = test_record();
        record.tags.clear();
        record.tags.insert("env".to_string(), "prod".to_string());
        apply_record(&mut vm, &record);

        let labels = vm.metadata.labels.as_ref().unwrap();
        assert!(labels.contains_key("owner"), "Foreign labels should be kept");
        assert!(!labels.contains_key("tag.harvesterhci.io/team"), "Dropped tags should be removed");
        assert!(labels.contains_key("tag.harvesterhci.io/env"));
        assert_eq!(vm.spec.template.spec.eviction_strategy.as_deref(), Some("LiveMigrate"));
    }

    #[test]
    fn test_update_patch_carries_version_and_changes_only() {
        let mut original = build_virtual_machine(&test_record()).unwrap();
        original.metadata.resource_version = Some("42".to_string());

        let mut record = test_record();
        record.cpu = 4;
        record.description = None;
        let mut desired = original.clone();
        apply_record(&mut desired, &record);

        let patch = update_patch(&original, &desired).unwrap();

        assert_eq!(patch["metadata"]["resourceVersion"], json!("42"));
        assert_eq!(patch["metadata"]["annotations"][DESCRIPTION_ANNOTATION], Value::Null);
        assert_eq!(patch["spec"]["template"]["spec"]["domain"]["cpu"]["cores"], json!(4));
        assert!(
            patch["metadata"].get("labels").is_none(),
            "Unchanged labels should not be in the patch"
        );
        assert!(patch["spec"].get("runStrategy").is_none());
    }

    #[test]
    fn test_update_patch_without_changes() {
        let mut vm = build_virtual_machine(&test_record()).unwrap();
        vm.metadata.resource_version = Some("7".to_string());

        let patch = update_patch(&vm, &vm.clone()).unwrap();
        assert_eq!(patch, json!({"metadata": {"resourceVersion": "7"}}));
    }

    #[test]
    fn test_removed_claims_respects_auto_delete() {
        let mut record = test_record();
        record.disks.push(DiskConfig {
            name: "data".to_string(),
            bus: "scsi".to_string(),
            boot_order: None,
            existing_volume_name: Some("vm1-data".to_string()),
            container_image_name: None,
            auto_delete: false,
        });
        let mut vm = build_virtual_machine(&record).unwrap();
        vm.spec.template.spec.volumes.push(Volume {
            name: "attached-later".to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: "hotplug-pvc".to_string(),
                read_only: None,
            }),
            ..Default::default()
        });

        let claims = removed_claims(&vm, &record.auto_delete_flags());

        assert_eq!(claims, vec!["vm1-rootdisk".to_string(), "hotplug-pvc".to_string()]);
    }

    #[test]
    fn test_mark_removed_claims() {
        let mut vm = VirtualMachine::new("vm1", VirtualMachineSpec::default());
        mark_removed_claims(&mut vm, &["a".to_string(), "b".to_string()]);
        assert_eq!(
            vm.metadata.annotations.unwrap().get(REMOVED_PVCS_ANNOTATION).map(String::as_str),
            Some("a,b")
        );
    }
}
