//! Deadline-bounded watch subscriptions.
//!
//! A [`Subscription`] is one watch on one named object. It yields change
//! events until the caller stops it or its deadline passes; a stream the
//! server closes early is reopened for the time left. [`wait_for`] drives a
//! subscription through a [`Condition`].

use crate::conditions::Condition;
use crate::error::LifecycleError;
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use kubevirt_client::{EventStream, KubevirtError, Resource, ResourceEvent, VirtualMachineClientTrait, WatchRequest};
use kubevirt_crds::{VirtualMachine, VirtualMachineInstance};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// What to watch and for how long.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitSpec {
    pub namespace: String,
    pub name: String,
    pub timeout: Duration,
}

impl WaitSpec {
    pub fn new(namespace: &str, name: &str, timeout: Duration) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            timeout,
        }
    }

    /// Watch request selecting only the named object.
    pub fn request(&self) -> WatchRequest {
        WatchRequest::for_name(&self.name, self.timeout)
    }
}

/// Result of a wait.
#[derive(Debug)]
pub enum WaitOutcome<K> {
    /// The condition was met by this object.
    Satisfied(K),
    /// The subscription ended before the condition was met.
    TimedOut,
}

/// Reopens the watch with the remaining time and the last seen version.
pub type Reopen<K> = Box<dyn Fn(WatchRequest) -> BoxFuture<'static, Result<EventStream<K>, KubevirtError>> + Send + Sync>;

/// Pause before reopening a watch the server closed.
pub const REOPEN_DELAY: Duration = Duration::from_millis(250);

/// A watch on one object with a client-side deadline.
///
/// The server caps how long a single watch stays open. When it closes the
/// stream before the deadline and a [`Reopen`] is set, the watch is resumed
/// from the last seen resource version until the deadline.
pub struct Subscription<K> {
    stream: Option<EventStream<K>>,
    deadline: Instant,
    target: String,
    reopen: Option<(Reopen<K>, WatchRequest)>,
    last_version: Option<String>,
}

impl<K> std::fmt::Debug for Subscription<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("open", &self.stream.is_some())
            .field("deadline", &self.deadline)
            .field("last_version", &self.last_version)
            .finish_non_exhaustive()
    }
}

impl<K: Resource> Subscription<K> {
    /// Wrap an already opened event stream.
    pub fn new(stream: EventStream<K>, target: String, timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            deadline: Instant::now() + timeout,
            target,
            reopen: None,
            last_version: None,
        }
    }

    /// Resume with `reopen` when the server closes the stream early.
    pub fn with_reopen(mut self, reopen: Reopen<K>, request: WatchRequest) -> Self {
        self.reopen = Some((reopen, request));
        self
    }

    /// Open the first stream through `reopen` and keep it for later resumes.
    async fn open(reopen: Reopen<K>, request: WatchRequest, target: String) -> Result<Self, LifecycleError> {
        let stream = reopen(request.clone()).await?;
        let timeout = request.timeout;
        Ok(Self::new(stream, target, timeout).with_reopen(reopen, request))
    }

    /// Next event, or `None` once the subscription is over.
    ///
    /// The subscription is over when it was stopped, when the deadline
    /// passed, or when the server closed the stream and it cannot be
    /// reopened. An in-band watch error ends the subscription and is
    /// returned.
    pub async fn next_event(&mut self) -> Result<Option<ResourceEvent<K>>, LifecycleError> {
        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            match tokio::time::timeout_at(self.deadline, stream.next()).await {
                Err(_) => {
                    debug!("Watch on {} reached its deadline", self.target);
                    self.stop();
                    return Ok(None);
                }
                Ok(None) => {
                    self.stream = None;
                    if !self.resume().await? {
                        debug!("Watch on {} closed by the server", self.target);
                        return Ok(None);
                    }
                }
                Ok(Some(Ok(event))) => {
                    if let Some(version) = event.resource_version() {
                        self.last_version = Some(version.to_string());
                    }
                    return Ok(Some(event));
                }
                Ok(Some(Err(e))) => {
                    self.stop();
                    return Err(e.into());
                }
            }
        }
    }

    /// Reopen a closed watch for the time left. Returns false when there is
    /// no reopen or no time left.
    async fn resume(&mut self) -> Result<bool, LifecycleError> {
        let Some((reopen, base)) = self.reopen.as_ref() else {
            return Ok(false);
        };

        tokio::time::sleep_until(self.deadline.min(Instant::now() + REOPEN_DELAY)).await;
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(false);
        }

        let mut request = base.clone();
        request.timeout = remaining;
        request.resource_version = self.last_version.clone();
        debug!(
            "Watch on {} closed by the server, reopening from version {} for {:?}",
            self.target,
            request.resource_version.as_deref().unwrap_or("0"),
            remaining
        );

        match reopen(request).await {
            Ok(stream) => {
                self.stream = Some(stream);
                Ok(true)
            }
            Err(e) => {
                self.reopen = None;
                Err(e.into())
            }
        }
    }

    /// Close the watch. Further calls to `next_event` return `None`.
    pub fn stop(&mut self) {
        self.stream = None;
        self.reopen = None;
    }

    #[cfg(test)]
    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

impl Subscription<VirtualMachine> {
    /// Open a watch on a VirtualMachine.
    pub async fn virtual_machine(
        client: Arc<dyn VirtualMachineClientTrait>,
        spec: &WaitSpec,
    ) -> Result<Self, LifecycleError> {
        let namespace = spec.namespace.clone();
        let reopen: Reopen<VirtualMachine> = Box::new(move |request: WatchRequest| {
            let client = Arc::clone(&client);
            let namespace = namespace.clone();
            async move { client.watch_virtual_machines(&namespace, &request).await }.boxed()
        });
        Self::open(
            reopen,
            spec.request(),
            format!("virtualmachine {}/{}", spec.namespace, spec.name),
        )
        .await
    }
}

impl Subscription<VirtualMachineInstance> {
    /// Open a watch on a VirtualMachineInstance.
    pub async fn virtual_machine_instance(
        client: Arc<dyn VirtualMachineClientTrait>,
        spec: &WaitSpec,
    ) -> Result<Self, LifecycleError> {
        let namespace = spec.namespace.clone();
        let reopen: Reopen<VirtualMachineInstance> = Box::new(move |request: WatchRequest| {
            let client = Arc::clone(&client);
            let namespace = namespace.clone();
            async move { client.watch_virtual_machine_instances(&namespace, &request).await }.boxed()
        });
        Self::open(
            reopen,
            spec.request(),
            format!("virtualmachineinstance {}/{}", spec.namespace, spec.name),
        )
        .await
    }
}

/// Feed events to `condition` until it is satisfied or the subscription ends.
///
/// The subscription is stopped as soon as the condition holds.
pub async fn wait_for<K, C>(
    subscription: &mut Subscription<K>,
    condition: &mut C,
) -> Result<WaitOutcome<K>, LifecycleError>
where
    K: Resource,
    C: Condition<K> + ?Sized,
{
    while let Some(event) = subscription.next_event().await? {
        debug!("{} event on {}", event.kind(), subscription.target);
        if condition.observe(&event) {
            subscription.stop();
            return Ok(WaitOutcome::Satisfied(event.into_object()));
        }
    }
    Ok(WaitOutcome::TimedOut)
}
