//! Prints the CRD manifests for the modelled KubeVirt resources.
//!
//! Intended for throwaway test clusters without a KubeVirt installation;
//! the schemas only cover the fields this workspace reads and writes.

use kube::CustomResourceExt;
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};

fn main() -> Result<(), serde_yaml::Error> {
    print!("{}", serde_yaml::to_string(&VirtualMachine::crd())?);
    println!("---");
    print!("{}", serde_yaml::to_string(&VirtualMachineInstance::crd())?);
    Ok(())
}
