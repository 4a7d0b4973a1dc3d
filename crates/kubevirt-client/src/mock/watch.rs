//! Scripted watch streams

use futures::StreamExt;
use futures::stream;
use kube::Resource;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::ObjectKey;
use super::helpers::lock;
use crate::error::KubevirtError;
use crate::models::{EventStream, ResourceEvent};

/// Events one watch replays, and whether the stream stays open afterwards
#[derive(Debug, Clone)]
pub struct WatchScript<K> {
    pub events: Vec<ResourceEvent<K>>,
    pub hold_open: bool,
}

impl<K> Default for WatchScript<K> {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            hold_open: false,
        }
    }
}

impl<K> WatchScript<K>
where
    K: Resource + Clone + Send + 'static,
{
    /// Replay the events then end, as when the server-side timeout fires
    pub fn closing(events: Vec<ResourceEvent<K>>) -> Self {
        Self {
            events,
            hold_open: false,
        }
    }

    /// Replay the events then stay silent until dropped
    pub fn held_open(events: Vec<ResourceEvent<K>>) -> Self {
        Self {
            events,
            hold_open: true,
        }
    }

    /// Turn the script into an event stream for `metadata.name=<name>`.
    ///
    /// Delivered events are mirrored into `store` so later reads observe
    /// the state the watch reported.
    pub(crate) fn into_stream(
        self,
        field_selector: &str,
        namespace: &str,
        store: Arc<Mutex<HashMap<ObjectKey, K>>>,
    ) -> EventStream<K> {
        let wanted = field_selector
            .strip_prefix("metadata.name=")
            .map(str::to_string);
        let namespace = namespace.to_string();

        let events = self.events.into_iter().filter(move |event| match &wanted {
            Some(name) => event.object().meta().name.as_deref() == Some(name.as_str()),
            None => true,
        });

        let replay = stream::iter(events).map(move |event| {
            mirror(&store, &namespace, &event);
            Ok::<_, KubevirtError>(event)
        });

        if self.hold_open {
            replay.chain(stream::pending()).boxed()
        } else {
            replay.boxed()
        }
    }
}

fn mirror<K>(store: &Mutex<HashMap<ObjectKey, K>>, namespace: &str, event: &ResourceEvent<K>)
where
    K: Resource + Clone,
{
    let name = event.object().meta().name.clone().unwrap_or_default();
    let key = (namespace.to_string(), name);
    let mut store = lock(store);
    match event {
        ResourceEvent::Added(obj) | ResourceEvent::Modified(obj) => {
            let mut obj = obj.clone();
            obj.meta_mut().namespace = Some(namespace.to_string());
            if obj.meta().resource_version.is_none() {
                obj.meta_mut().resource_version = store
                    .get(&key)
                    .and_then(|existing| existing.meta().resource_version.clone());
            }
            store.insert(key, obj);
        }
        ResourceEvent::Deleted(_) => {
            store.remove(&key);
        }
    }
}
