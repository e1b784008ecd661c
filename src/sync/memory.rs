//! # In-Memory Object Store
//!
//! A process-local [`ObjectClient`] with the same contract as the API server for the
//! operations the synchronizer uses: atomic create, resource versions with optimistic
//! concurrency on update, and a broadcast-backed native watch.
//!
//! Selected with `KEY_STORE_BACKEND=memory` to run a single replica outside a cluster,
//! and shared between several synchronizers in tests to play the part of the cluster.

use super::client::{ClientError, ObjectClient};
use super::event::{Event, EventSource};
use super::lock;
use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::broadcast;

const WATCH_CHANNEL_CAPACITY: usize = 64;

/// Backend operation, used for failure injection and call accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    Create,
    Update,
    Delete,
    Watch,
}

#[derive(Debug, Clone)]
enum Change<K> {
    Upserted(K),
    Removed,
}

#[derive(Debug, Clone)]
struct StoreEvent<K> {
    namespace: String,
    name: String,
    change: Change<K>,
}

type Key = (String, String);

/// Process-local object store
pub struct MemoryObjectClient<K> {
    objects: Mutex<HashMap<Key, K>>,
    revision: AtomicU64,
    events: broadcast::Sender<StoreEvent<K>>,
    failures: Mutex<VecDeque<(Operation, ClientError)>>,
    calls: Mutex<HashMap<Operation, usize>>,
}

impl<K> fmt::Debug for MemoryObjectClient<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryObjectClient")
            .field("objects", &lock(&self.objects).len())
            .field("revision", &self.revision.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<K: Clone> Default for MemoryObjectClient<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Clone> MemoryObjectClient<K> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Self {
            objects: Mutex::new(HashMap::new()),
            revision: AtomicU64::new(0),
            events,
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Make the next call of `operation` fail with `error`.
    ///
    /// Injected failures are consumed in order, one per call.
    pub fn inject_failure(&self, operation: Operation, error: ClientError) {
        lock(&self.failures).push_back((operation, error));
    }

    /// Number of calls made for `operation`, including failed ones
    pub fn calls(&self, operation: Operation) -> usize {
        lock(&self.calls).get(&operation).copied().unwrap_or(0)
    }

    fn record(&self, operation: Operation) -> Result<(), ClientError> {
        *lock(&self.calls).entry(operation).or_insert(0) += 1;
        let mut failures = lock(&self.failures);
        match failures.iter().position(|(op, _)| *op == operation) {
            Some(index) => Err(failures
                .remove(index)
                .map(|(_, err)| err)
                .unwrap_or_else(|| ClientError::Unavailable("injected failure".into()))),
            None => Ok(()),
        }
    }

    fn next_revision(&self) -> String {
        (self.revision.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn publish(&self, namespace: &str, name: &str, change: Change<K>) {
        // No subscribers is not an error
        let _ = self.events.send(StoreEvent {
            namespace: namespace.to_string(),
            name: name.to_string(),
            change,
        });
    }
}

#[async_trait]
impl<K> ObjectClient for MemoryObjectClient<K>
where
    K: Resource + Clone + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    type Object = K;

    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        self.record(Operation::Get)?;
        lock(&self.objects)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClientError::not_found(namespace, name))
    }

    async fn create(&self, namespace: &str, object: &K) -> Result<K, ClientError> {
        self.record(Operation::Create)?;
        let name = object.name_any();
        let stored = {
            let mut objects = lock(&self.objects);
            let key = (namespace.to_string(), name.clone());
            if objects.contains_key(&key) {
                return Err(ClientError::already_exists(namespace, &name));
            }
            let mut stored = object.clone();
            let meta = stored.meta_mut();
            meta.namespace = Some(namespace.to_string());
            meta.resource_version = Some(self.next_revision());
            objects.insert(key, stored.clone());
            stored
        };
        self.publish(namespace, &name, Change::Upserted(stored.clone()));
        Ok(stored)
    }

    async fn update(&self, namespace: &str, object: &K) -> Result<K, ClientError> {
        self.record(Operation::Update)?;
        let name = object.name_any();
        let stored = {
            let mut objects = lock(&self.objects);
            let key = (namespace.to_string(), name.clone());
            let Some(current) = objects.get(&key) else {
                return Err(ClientError::not_found(namespace, &name));
            };
            if let Some(expected) = object.meta().resource_version.as_deref() {
                if current.meta().resource_version.as_deref() != Some(expected) {
                    return Err(ClientError::Conflict {
                        namespace: namespace.to_string(),
                        name,
                        message: "the object has been modified; please apply your changes to the latest version".into(),
                    });
                }
            }
            let mut stored = object.clone();
            let meta = stored.meta_mut();
            meta.namespace = Some(namespace.to_string());
            meta.resource_version = Some(self.next_revision());
            objects.insert(key, stored.clone());
            stored
        };
        self.publish(namespace, &name, Change::Upserted(stored.clone()));
        Ok(stored)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        self.record(Operation::Delete)?;
        let removed = lock(&self.objects).remove(&(namespace.to_string(), name.to_string()));
        match removed {
            Some(_) => {
                self.publish(namespace, name, Change::Removed);
                Ok(())
            }
            None => Err(ClientError::not_found(namespace, name)),
        }
    }

    async fn watch(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Box<dyn EventSource<K>>, ClientError> {
        self.record(Operation::Watch)?;
        // Subscribe before reading the current state so no change falls in between
        let receiver = self.events.subscribe();
        let initial = lock(&self.objects)
            .get(&(namespace.to_string(), name.to_string()))
            .cloned();
        Ok(Box::new(MemoryWatch {
            namespace: namespace.to_string(),
            name: name.to_string(),
            present: initial.is_some(),
            initial,
            receiver,
            stopped: false,
        }))
    }
}

/// Native watch over a [`MemoryObjectClient`]
struct MemoryWatch<K> {
    namespace: String,
    name: String,
    initial: Option<K>,
    present: bool,
    receiver: broadcast::Receiver<StoreEvent<K>>,
    stopped: bool,
}

#[async_trait]
impl<K: Clone + Send + 'static> EventSource<K> for MemoryWatch<K> {
    async fn next(&mut self) -> Option<Event<K>> {
        if self.stopped {
            return None;
        }
        if let Some(obj) = self.initial.take() {
            return Some(Event::Added(obj));
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.namespace == self.namespace && event.name == self.name => {
                    return Some(match event.change {
                        Change::Upserted(obj) if self.present => Event::Modified(obj),
                        Change::Upserted(obj) => {
                            self.present = true;
                            Event::Added(obj)
                        }
                        Change::Removed => {
                            self.present = false;
                            Event::Deleted
                        }
                    });
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    return Some(Event::Error(format!(
                        "watch fell behind by {skipped} events"
                    )));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[tokio::test]
    async fn test_create_is_atomic() {
        let store = MemoryObjectClient::<Secret>::new();
        store.create("ns", &secret("a")).await.unwrap();

        let err = store.create("ns", &secret("a")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_update_rejects_stale_resource_version() {
        let store = MemoryObjectClient::<Secret>::new();
        let created = store.create("ns", &secret("a")).await.unwrap();
        store.update("ns", &created).await.unwrap();

        // `created` still carries the first resource version
        let err = store.update("ns", &created).await.unwrap_err();
        assert!(matches!(err, ClientError::Conflict { .. }));
    }

    #[tokio::test]
    async fn test_update_without_resource_version_is_unconditional() {
        let store = MemoryObjectClient::<Secret>::new();
        store.create("ns", &secret("a")).await.unwrap();
        store.update("ns", &secret("a")).await.unwrap();
        store.update("ns", &secret("a")).await.unwrap();
        assert_eq!(store.calls(Operation::Update), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let store = MemoryObjectClient::<Secret>::new();
        store.create("ns", &secret("a")).await.unwrap();
        store.inject_failure(Operation::Get, ClientError::Unavailable("down".into()));

        assert!(store.get("ns", "a").await.is_err());
        assert!(store.get("ns", "a").await.is_ok());
    }

    #[tokio::test]
    async fn test_watch_reports_lifecycle() {
        let store = MemoryObjectClient::<Secret>::new();
        let mut watch = store.watch("ns", "a").await.unwrap();

        store.create("ns", &secret("other")).await.unwrap();
        store.create("ns", &secret("a")).await.unwrap();
        store.update("ns", &secret("a")).await.unwrap();
        store.delete("ns", "a").await.unwrap();

        assert!(matches!(watch.next().await, Some(Event::Added(_))));
        assert!(matches!(watch.next().await, Some(Event::Modified(_))));
        assert_eq!(watch.next().await, Some(Event::Deleted));

        watch.stop();
        watch.stop();
        assert_eq!(watch.next().await, None);
    }

    #[tokio::test]
    async fn test_watch_starts_with_existing_object() {
        let store = MemoryObjectClient::<Secret>::new();
        store.create("ns", &secret("a")).await.unwrap();

        let mut watch = store.watch("ns", "a").await.unwrap();
        assert!(matches!(watch.next().await, Some(Event::Added(_))));
    }
}
