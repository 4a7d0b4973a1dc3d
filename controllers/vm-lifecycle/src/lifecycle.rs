//! VM lifecycle orchestration.
//!
//! Each operation takes the configuration record, talks to the cluster
//! through a [`VirtualMachineClientTrait`] and writes the outcome back into
//! the record:
//!
//! - **create**: submit the VM, wait until it reports ready, wait until every
//!   lease-waiting interface has an address, then read the final state
//! - **read**: refresh observed state, clearing the record if the VM is gone
//! - **update**: merge the record into the live VM and write it back
//! - **delete**: mark the claims to remove, delete the VM and wait for the
//!   deletion event
//!
//! Timeouts are terminal. Nothing is rolled back: an object created before a
//! wait timed out stays on the cluster and keeps its id in the record.

use crate::builder::{apply_record, build_virtual_machine, mark_removed_claims, removed_claims, update_patch};
use crate::conditions::{Deletion, LeaseTracker, Readiness};
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::record::{build_id, InterfaceState, ObservedState, VirtualMachineRecord};
use crate::watcher::{wait_for, Subscription, WaitOutcome, WaitSpec};
use chrono::Utc;
use kubevirt_client::{DeletePropagation, KubevirtError, VirtualMachineClientTrait};
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a read.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// The VM no longer exists; the record was cleared.
    Gone,
    /// The VM exists but has no instance yet; the record was left as is.
    NotMaterialized,
    /// The record state was refreshed.
    Observed(ObservedState),
}

/// Lifecycle operation selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
}

/// Drives lifecycle operations against one cluster.
///
/// Holds no per-operation state, so one instance can serve concurrent
/// operations on different VMs.
#[derive(Clone)]
pub struct Lifecycle {
    client: Arc<dyn VirtualMachineClientTrait>,
    config: LifecycleConfig,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Lifecycle {
    pub fn new(client: Arc<dyn VirtualMachineClientTrait>, config: LifecycleConfig) -> Self {
        Self { client, config }
    }

    #[cfg(test)]
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Run `operation` on `record`.
    pub async fn run(&self, operation: Operation, record: &mut VirtualMachineRecord) -> Result<(), LifecycleError> {
        match operation {
            Operation::Create => self.create(record).await,
            Operation::Read => self.read(record).await.map(|_| ()),
            Operation::Update => self.update(record).await.map(|_| ()),
            Operation::Delete => self.delete(record).await,
        }
    }

    /// Create the VM and wait until it is ready and has its leases.
    pub async fn create(&self, record: &mut VirtualMachineRecord) -> Result<(), LifecycleError> {
        let vm = build_virtual_machine(record)?;
        let namespace = record.namespace.clone();
        let name = record.name.clone();

        info!("Creating VirtualMachine {}/{}", namespace, name);
        self.client.create_virtual_machine(&namespace, &vm).await?;
        record.id = Some(build_id(&namespace, &name));

        self.wait_ready(&namespace, &name).await?;

        let leases = record.lease_interfaces();
        if leases.is_empty() {
            debug!("No interfaces of {}/{} wait for a lease", namespace, name);
        } else {
            self.wait_leases(&namespace, &name, leases).await?;
        }

        let vm = self.client.get_virtual_machine(&namespace, &name).await?;
        let vmi = self.fetch_instance(&namespace, &name).await?;
        record.state = Some(observed_state(&vm, vmi.as_ref()));

        info!("Created VirtualMachine {}/{}", namespace, name);
        Ok(())
    }

    /// Refresh the observed state of the record.
    pub async fn read(&self, record: &mut VirtualMachineRecord) -> Result<ReadOutcome, LifecycleError> {
        let (namespace, name) = record.identity()?;
        debug!("Reading VirtualMachine {}/{}", namespace, name);

        let Some(vm) = self.fetch_machine(&namespace, &name).await? else {
            info!("VirtualMachine {}/{} no longer exists, clearing record", namespace, name);
            record.clear();
            return Ok(ReadOutcome::Gone);
        };

        let Some(vmi) = self.fetch_instance(&namespace, &name).await? else {
            debug!("VirtualMachineInstance {}/{} not found yet", namespace, name);
            return Ok(ReadOutcome::NotMaterialized);
        };

        let state = observed_state(&vm, Some(&vmi));
        record.namespace = namespace;
        record.name = name;
        record.state = Some(state.clone());
        Ok(ReadOutcome::Observed(state))
    }

    /// Write the desired record into the live VM, then read it back.
    pub async fn update(&self, record: &mut VirtualMachineRecord) -> Result<ReadOutcome, LifecycleError> {
        let (namespace, name) = record.identity()?;
        // The id names the live object; labels derived from the record must match it
        record.namespace = namespace.clone();
        record.name = name.clone();
        record.validate()?;
        info!("Updating VirtualMachine {}/{}", namespace, name);

        let desired = record.clone();
        let updated = self
            .modify(&namespace, &name, |vm| apply_record(vm, &desired))
            .await?;

        if updated.is_none() {
            info!("VirtualMachine {}/{} no longer exists, clearing record", namespace, name);
            record.clear();
            return Ok(ReadOutcome::Gone);
        }

        self.read(record).await
    }

    /// Delete the VM together with its auto-delete claims.
    pub async fn delete(&self, record: &mut VirtualMachineRecord) -> Result<(), LifecycleError> {
        let (namespace, name) = record.identity()?;
        let id = build_id(&namespace, &name);
        info!("Deleting VirtualMachine {}", id);

        let flags = record.auto_delete_flags();
        let marked = self
            .modify(&namespace, &name, |vm| {
                let claims = removed_claims(vm, &flags);
                mark_removed_claims(vm, &claims);
            })
            .await?;

        if marked.is_none() {
            info!("VirtualMachine {} already gone", id);
            record.clear();
            return Ok(());
        }

        // Open the watch first; a deletion finishing before it opens is never reported
        let spec = WaitSpec::new(&namespace, &name, self.config.delete_timeout);
        let mut subscription = Subscription::virtual_machine(Arc::clone(&self.client), &spec).await?;

        match self
            .client
            .delete_virtual_machine(&namespace, &name, DeletePropagation::Foreground)
            .await
        {
            Ok(()) => {
                debug!("Waiting for VirtualMachine {} to be deleted", id);
                match wait_for(&mut subscription, &mut Deletion).await? {
                    WaitOutcome::Satisfied(_) => {}
                    WaitOutcome::TimedOut => return Err(LifecycleError::DeleteTimeout { id }),
                }
            }
            Err(e) if e.is_not_found() => {
                debug!("VirtualMachine {} vanished before the delete call", id);
                subscription.stop();
            }
            Err(e) => return Err(e.into()),
        }

        info!("Deleted VirtualMachine {}", id);
        record.clear();
        Ok(())
    }

    async fn wait_ready(&self, namespace: &str, name: &str) -> Result<(), LifecycleError> {
        debug!("Waiting for VirtualMachine {}/{} to be ready", namespace, name);
        let spec = WaitSpec::new(namespace, name, self.config.create_timeout);
        let mut subscription = Subscription::virtual_machine(Arc::clone(&self.client), &spec).await?;

        match wait_for(&mut subscription, &mut Readiness).await? {
            WaitOutcome::Satisfied(_) => Ok(()),
            WaitOutcome::TimedOut => Err(LifecycleError::ReadyTimeout {
                name: name.to_string(),
            }),
        }
    }

    async fn wait_leases(&self, namespace: &str, name: &str, pending: BTreeSet<String>) -> Result<(), LifecycleError> {
        let mut leases = LeaseTracker::new(pending);
        debug!(
            "Waiting for addresses on {}/{} interfaces: {}",
            namespace,
            name,
            leases.pending().collect::<Vec<_>>().join(", ")
        );

        let spec = WaitSpec::new(namespace, name, self.config.lease_timeout);
        let mut subscription = Subscription::virtual_machine_instance(Arc::clone(&self.client), &spec).await?;

        match wait_for(&mut subscription, &mut leases).await? {
            WaitOutcome::Satisfied(_) => Ok(()),
            WaitOutcome::TimedOut => {
                warn!(
                    "Interfaces of {}/{} still without address: {}",
                    namespace,
                    name,
                    leases.pending().collect::<Vec<_>>().join(", ")
                );
                Err(LifecycleError::LeaseTimeout {
                    name: name.to_string(),
                })
            }
        }
    }

    /// Version-checked read-modify-write of a VM.
    ///
    /// Returns `None` if the VM does not exist. A conflicting write is
    /// retried on a freshly fetched object up to `conflict_retries` times.
    async fn modify<F>(&self, namespace: &str, name: &str, mutate: F) -> Result<Option<VirtualMachine>, LifecycleError>
    where
        F: Fn(&mut VirtualMachine) + Send + Sync,
    {
        let mut attempt = 0;
        loop {
            let Some(current) = self.fetch_machine(namespace, name).await? else {
                return Ok(None);
            };

            let mut desired = current.clone();
            mutate(&mut desired);
            let patch = update_patch(&current, &desired)?;

            match self.client.patch_virtual_machine(namespace, name, &patch).await {
                Ok(vm) => return Ok(Some(vm)),
                Err(e) if e.is_not_found() => return Ok(None),
                Err(e) if e.is_conflict() && attempt < self.config.conflict_retries => {
                    attempt += 1;
                    warn!(
                        "Conflict writing VirtualMachine {}/{}, retrying ({}/{})",
                        namespace, name, attempt, self.config.conflict_retries
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn fetch_machine(&self, namespace: &str, name: &str) -> Result<Option<VirtualMachine>, LifecycleError> {
        optional(self.client.get_virtual_machine(namespace, name).await)
    }

    async fn fetch_instance(&self, namespace: &str, name: &str) -> Result<Option<VirtualMachineInstance>, LifecycleError> {
        optional(self.client.get_virtual_machine_instance(namespace, name).await)
    }
}

fn optional<T>(result: Result<T, KubevirtError>) -> Result<Option<T>, LifecycleError> {
    match result {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Observed state from a VM and, if it exists, its instance.
pub fn observed_state(vm: &VirtualMachine, vmi: Option<&VirtualMachineInstance>) -> ObservedState {
    let status = vm.status.as_ref();
    ObservedState {
        ready: vm.is_ready(),
        printable_status: status.and_then(|s| s.printable_status.clone()),
        node_name: vmi
            .and_then(|vmi| vmi.status.as_ref())
            .and_then(|s| s.node_name.clone()),
        network_interfaces: vmi
            .map(|vmi| {
                vmi.reported_interfaces()
                    .iter()
                    .map(|iface| InterfaceState {
                        name: iface.name.clone(),
                        ip_address: iface.ip_address.clone(),
                        mac_address: iface.mac.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default(),
        last_synced: Utc::now(),
    }
}
