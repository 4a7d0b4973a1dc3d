//! Well-known annotation and label keys

/// Comma-joined list of PVC claim names the cluster should garbage-collect
/// together with the VirtualMachine.
pub const REMOVED_PVCS_ANNOTATION: &str = "harvesterhci.io/removedPersistentVolumeClaims";

/// Free-form description of the VirtualMachine.
pub const DESCRIPTION_ANNOTATION: &str = "field.cattle.io/description";

/// Prefix for user tags stored as labels.
pub const TAG_LABEL_PREFIX: &str = "tag.harvesterhci.io/";

/// Label carrying the VM name on the instance template.
pub const VM_NAME_LABEL: &str = "harvesterhci.io/vmName";

/// Owner marker set on objects created by the lifecycle handler.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Value of [`MANAGED_BY_LABEL`].
pub const MANAGED_BY_VALUE: &str = "vm-lifecycle";
