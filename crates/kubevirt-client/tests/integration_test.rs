//! Integration tests for the KubeVirt client
//!
//! These tests require a cluster with KubeVirt installed and a kubeconfig.
//! Set KUBEVIRT_TEST_NAMESPACE to choose the namespace (defaults to "default").

use futures::StreamExt;
use kubevirt_client::{KubevirtClient, VirtualMachineClientTrait, WatchRequest};
use std::time::Duration;

fn namespace() -> String {
    std::env::var("KUBEVIRT_TEST_NAMESPACE").unwrap_or_else(|_| "default".to_string())
}

#[tokio::test]
#[ignore] // Requires a running cluster
async fn test_client_creation() {
    let client = KubevirtClient::try_default().await;
    assert!(client.is_ok(), "Failed to create client");
}

#[tokio::test]
#[ignore]
async fn test_get_missing_vm_is_not_found() {
    let client = KubevirtClient::try_default()
        .await
        .expect("Failed to create client");

    let err = client
        .get_virtual_machine(&namespace(), "vm-lifecycle-does-not-exist")
        .await
        .expect_err("VM should not exist");

    assert!(err.is_not_found(), "Expected NotFound, got {}", err);
}

#[tokio::test]
#[ignore]
async fn test_watch_missing_vm_ends_at_timeout() {
    let client = KubevirtClient::try_default()
        .await
        .expect("Failed to create client");

    let request = WatchRequest::for_name("vm-lifecycle-does-not-exist", Duration::from_secs(2));
    let events: Vec<_> = client
        .watch_virtual_machines(&namespace(), &request)
        .await
        .expect("Failed to open watch")
        .collect()
        .await;

    println!("Received {} events", events.len());
    assert!(events.is_empty());
}
