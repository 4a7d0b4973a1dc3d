//! Wait conditions evaluated against watch events.

use kubevirt_client::ResourceEvent;
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};
use std::collections::BTreeSet;
use tracing::debug;

/// A predicate fed one event at a time.
pub trait Condition<K> {
    /// Observe an event; returns true once the condition holds.
    fn observe(&mut self, event: &ResourceEvent<K>) -> bool;
}

/// The VM reports ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct Readiness;

impl Condition<VirtualMachine> for Readiness {
    fn observe(&mut self, event: &ResourceEvent<VirtualMachine>) -> bool {
        event.applied().is_some_and(VirtualMachine::is_ready)
    }
}

/// The watched object was deleted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deletion;

impl<K> Condition<K> for Deletion {
    fn observe(&mut self, event: &ResourceEvent<K>) -> bool {
        event.is_deleted()
    }
}

/// Interfaces still waiting for an address.
///
/// Names only ever leave the set; the condition holds once it is empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseTracker {
    pending: BTreeSet<String>,
}

impl LeaseTracker {
    pub fn new(pending: BTreeSet<String>) -> Self {
        Self { pending }
    }

    pub fn is_satisfied(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }
}

impl Condition<VirtualMachineInstance> for LeaseTracker {
    fn observe(&mut self, event: &ResourceEvent<VirtualMachineInstance>) -> bool {
        let Some(vmi) = event.applied() else {
            return false;
        };

        for iface in vmi.reported_interfaces() {
            if iface.has_address() && self.pending.remove(&iface.name) {
                debug!("Interface {} got address {}", iface.name, iface.ip_address);
            }
        }

        self.is_satisfied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;

    fn tracker(names: &[&str]) -> LeaseTracker {
        LeaseTracker::new(names.iter().map(|n| n.to_string()).collect())
    }

    #[test]
    fn test_readiness_ignores_not_ready_and_deleted() {
        let mut readiness = Readiness;
        assert!(!readiness.observe(&ResourceEvent::Added(test_vm("vm1", false))));
        assert!(!readiness.observe(&ResourceEvent::Deleted(test_vm("vm1", true))));
        assert!(readiness.observe(&ResourceEvent::Modified(test_vm("vm1", true))));
        assert!(readiness.observe(&ResourceEvent::Added(test_vm("vm1", true))));
    }

    #[test]
    fn test_readiness_without_status() {
        let mut vm = test_vm("vm1", true);
        vm.status = None;
        assert!(!Readiness.observe(&ResourceEvent::Modified(vm)));
    }

    #[test]
    fn test_deletion_only_on_deleted() {
        let mut deletion = Deletion;
        assert!(!deletion.observe(&ResourceEvent::Added(test_vm("vm1", true))));
        assert!(!deletion.observe(&ResourceEvent::Modified(test_vm("vm1", false))));
        assert!(deletion.observe(&ResourceEvent::Deleted(test_vm("vm1", false))));
    }

    #[test]
    fn test_leases_in_any_order() {
        let mut leases = tracker(&["net0", "net1", "net2"]);

        assert!(!leases.observe(&ResourceEvent::Added(test_vmi("vm1", &[("net2", "10.0.0.7")]))));
        assert!(!leases.observe(&ResourceEvent::Modified(test_vmi(
            "vm1",
            &[("net2", "10.0.0.7"), ("net0", "10.0.0.5")]
        ))));
        assert_eq!(leases.pending().collect::<Vec<_>>(), vec!["net1"]);
        assert!(leases.observe(&ResourceEvent::Modified(test_vmi("vm1", &[("net1", "10.0.1.5")]))));
    }

    #[test]
    fn test_empty_address_and_unknown_interface_stay_pending() {
        let mut leases = tracker(&["net0"]);

        assert!(!leases.observe(&ResourceEvent::Modified(test_vmi("vm1", &[("net0", "")]))));
        assert!(!leases.observe(&ResourceEvent::Modified(test_vmi("vm1", &[("other", "10.0.0.9")]))));
        assert!(!leases.observe(&ResourceEvent::Modified(test_vmi("vm1", &[]))));
        assert!(!leases.is_satisfied());
    }

    #[test]
    fn test_deleted_vmi_is_not_processed() {
        let mut leases = tracker(&["net0"]);
        assert!(!leases.observe(&ResourceEvent::Deleted(test_vmi("vm1", &[("net0", "10.0.0.5")]))));
        assert_eq!(leases.pending().count(), 1);
    }

    #[test]
    fn test_empty_tracker_is_satisfied() {
        assert!(tracker(&[]).is_satisfied());
    }
}
