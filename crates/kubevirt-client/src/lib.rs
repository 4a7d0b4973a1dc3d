//! KubeVirt API Client
//!
//! A thin client over `kube` for the two KubeVirt kinds the VM lifecycle
//! handler touches: `VirtualMachine` (CRUD + watch) and
//! `VirtualMachineInstance` (get + watch).
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use futures::StreamExt;
//! use kubevirt_client::{KubevirtClient, VirtualMachineClientTrait, WatchRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = KubevirtClient::try_default().await?;
//!
//! let vm = client.get_virtual_machine("default", "vm1").await?;
//! println!("ready: {}", vm.is_ready());
//!
//! // Follow changes to a single VM for at most a minute
//! let request = WatchRequest::for_name("vm1", Duration::from_secs(60));
//! let mut events = client.watch_virtual_machines("default", &request).await?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event?.kind());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **test-util**: in-memory [`MockKubevirtClient`] with scripted watch streams

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod client_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::KubevirtClient;
pub use error::KubevirtError;
pub use models::*;
pub use client_trait::VirtualMachineClientTrait;
// Bound for generic code over the watched kinds
pub use kube::Resource;
#[cfg(feature = "test-util")]
pub use mock::{MockCall, MockKubevirtClient, MockOperation};
