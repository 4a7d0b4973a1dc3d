//! KubeVirt API client
//!
//! Implements [`VirtualMachineClientTrait`] on top of `kube::Api` for the
//! `kubevirt.io/v1` kinds.

use async_trait::async_trait;
use futures::StreamExt;
use kube::api::{DeleteParams, Patch, PatchParams, PostParams, WatchEvent, WatchParams};
use kube::{Api, Client, Resource};
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use tracing::debug;

use crate::client_trait::VirtualMachineClientTrait;
use crate::error::KubevirtError;
use crate::models::{DeletePropagation, EventStream, ResourceEvent, WatchRequest};

/// Production client backed by a `kube::Client`
#[derive(Clone)]
pub struct KubevirtClient {
    client: Client,
}

impl KubevirtClient {
    /// Wrap an existing Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Create a client from the ambient configuration.
    ///
    /// This will attempt to load config from:
    /// 1. In-cluster service account (when running in K8s)
    /// 2. KUBECONFIG environment variable
    /// 3. ~/.kube/config
    pub async fn try_default() -> Result<Self, KubevirtError> {
        let client = Client::try_default().await?;
        debug!("Kubernetes client initialized");
        Ok(Self { client })
    }

    fn virtual_machines(&self, namespace: &str) -> Api<VirtualMachine> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn virtual_machine_instances(&self, namespace: &str) -> Api<VirtualMachineInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Open a watch and translate the raw API events.
///
/// Bookmarks are dropped; in-band error events end up as `Err` items.
async fn open_watch<K>(api: &Api<K>, request: &WatchRequest) -> Result<EventStream<K>, KubevirtError>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + 'static,
{
    let params = WatchParams::default()
        .fields(&request.field_selector)
        .timeout(request.server_timeout_secs());

    // "0" replays the current state as ADDED events
    let version = request.resource_version.as_deref().unwrap_or("0");
    debug!(
        "Opening watch with selector '{}' from version {} ({}s)",
        request.field_selector,
        version,
        request.server_timeout_secs()
    );

    let stream = api.watch(&params, version).await?;

    Ok(stream
        .filter_map(|event| async move {
            match event {
                Ok(WatchEvent::Added(obj)) => Some(Ok(ResourceEvent::Added(obj))),
                Ok(WatchEvent::Modified(obj)) => Some(Ok(ResourceEvent::Modified(obj))),
                Ok(WatchEvent::Deleted(obj)) => Some(Ok(ResourceEvent::Deleted(obj))),
                Ok(WatchEvent::Bookmark(_)) => None,
                Ok(WatchEvent::Error(err)) => Some(Err(KubevirtError::Watch(format!(
                    "{} (code {})",
                    err.message, err.code
                )))),
                Err(e) => Some(Err(e.into())),
            }
        })
        .boxed())
}

fn delete_params(propagation: DeletePropagation) -> DeleteParams {
    match propagation {
        DeletePropagation::Foreground => DeleteParams::foreground(),
        DeletePropagation::Background => DeleteParams::background(),
        DeletePropagation::Orphan => DeleteParams::orphan(),
    }
}

#[async_trait]
impl VirtualMachineClientTrait for KubevirtClient {
    async fn get_virtual_machine(&self, namespace: &str, name: &str) -> Result<VirtualMachine, KubevirtError> {
        Ok(self.virtual_machines(namespace).get(name).await?)
    }

    async fn create_virtual_machine(&self, namespace: &str, vm: &VirtualMachine) -> Result<VirtualMachine, KubevirtError> {
        Ok(self
            .virtual_machines(namespace)
            .create(&PostParams::default(), vm)
            .await?)
    }

    async fn patch_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<VirtualMachine, KubevirtError> {
        Ok(self
            .virtual_machines(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await?)
    }

    async fn delete_virtual_machine(
        &self,
        namespace: &str,
        name: &str,
        propagation: DeletePropagation,
    ) -> Result<(), KubevirtError> {
        self.virtual_machines(namespace)
            .delete(name, &delete_params(propagation))
            .await?;
        Ok(())
    }

    async fn watch_virtual_machines(
        &self,
        namespace: &str,
        request: &WatchRequest,
    ) -> Result<EventStream<VirtualMachine>, KubevirtError> {
        open_watch(&self.virtual_machines(namespace), request).await
    }

    async fn get_virtual_machine_instance(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<VirtualMachineInstance, KubevirtError> {
        Ok(self.virtual_machine_instances(namespace).get(name).await?)
    }

    async fn watch_virtual_machine_instances(
        &self,
        namespace: &str,
        request: &WatchRequest,
    ) -> Result<EventStream<VirtualMachineInstance>, KubevirtError> {
        open_watch(&self.virtual_machine_instances(namespace), request).await
    }
}
