//! KubeVirt CRD Definitions
//!
//! Typed views of the `kubevirt.io/v1` resources managed by the VM lifecycle
//! handler. Only the fields the handler reads or writes are modelled; unknown
//! fields returned by the API server are dropped on deserialization.

pub mod annotations;
pub mod domain;
pub mod virtual_machine;
pub mod virtual_machine_instance;

pub use annotations::*;
pub use domain::*;
pub use virtual_machine::*;
pub use virtual_machine_instance::*;
