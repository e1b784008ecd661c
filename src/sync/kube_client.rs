//! # Kubernetes Secret Client
//!
//! [`ObjectClient`] backed by the Kubernetes API server, plus the native watch
//! event source built on `kube_runtime::watcher`.

use super::client::{ClientError, ObjectClient};
use super::event::{Event, EventSource};
use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, PostParams};
use kube::{Client, ResourceExt};
use kube_runtime::watcher;
use std::fmt;
use tracing::debug;

/// Secrets in one namespace of the cluster the service runs in
#[derive(Clone)]
pub struct KubeSecretClient {
    client: Client,
}

impl fmt::Debug for KubeSecretClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeSecretClient").finish_non_exhaustive()
    }
}

impl KubeSecretClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Secret> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Classify a Kubernetes API error for the synchronizer
pub(crate) fn map_kube_error(err: kube::Error, namespace: &str, name: &str) -> ClientError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => ClientError::not_found(namespace, name),
        kube::Error::Api(api_err) if api_err.code == 409 && api_err.reason == "AlreadyExists" => {
            ClientError::already_exists(namespace, name)
        }
        kube::Error::Api(api_err) if api_err.code == 409 => ClientError::Conflict {
            namespace: namespace.to_string(),
            name: name.to_string(),
            message: api_err.message.clone(),
        },
        kube::Error::Api(api_err) => ClientError::Api {
            code: api_err.code,
            reason: api_err.reason.clone(),
            message: api_err.message.clone(),
        },
        other => ClientError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ObjectClient for KubeSecretClient {
    type Object = Secret;

    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, ClientError> {
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| map_kube_error(e, namespace, name))
    }

    async fn create(&self, namespace: &str, object: &Secret) -> Result<Secret, ClientError> {
        let name = object.name_any();
        self.api(namespace)
            .create(&PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(e, namespace, &name))
    }

    async fn update(&self, namespace: &str, object: &Secret) -> Result<Secret, ClientError> {
        let name = object.name_any();
        self.api(namespace)
            .replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| map_kube_error(e, namespace, &name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        self.api(namespace)
            .delete(name, &DeleteParams::default().grace_period(0))
            .await
            .map(|_| ())
            .map_err(|e| map_kube_error(e, namespace, name))
    }

    async fn watch(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Box<dyn EventSource<Secret>>, ClientError> {
        let config = watcher::Config::default().fields(&format!("metadata.name={name}"));
        let stream = watcher(self.api(namespace), config).boxed();
        debug!(secret.namespace = %namespace, secret.name = %name, "Opened native watch");
        Ok(Box::new(WatchEventSource::new(stream)))
    }
}

/// Native watch adapted to [`EventSource`].
///
/// `kube_runtime::watcher` re-lists on (re)connect; a re-list that no longer
/// contains an object we had seen is reported as a deletion.
pub struct WatchEventSource<K> {
    stream: BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>,
    present: bool,
    seen_in_relist: bool,
    stopped: bool,
}

impl<K> fmt::Debug for WatchEventSource<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchEventSource")
            .field("present", &self.present)
            .field("stopped", &self.stopped)
            .finish_non_exhaustive()
    }
}

impl<K> WatchEventSource<K> {
    pub fn new(stream: BoxStream<'static, Result<watcher::Event<K>, watcher::Error>>) -> Self {
        Self {
            stream,
            present: false,
            seen_in_relist: false,
            stopped: false,
        }
    }

    fn upsert(&mut self, obj: K) -> Event<K> {
        let event = if self.present {
            Event::Modified(obj)
        } else {
            Event::Added(obj)
        };
        self.present = true;
        event
    }
}

#[async_trait]
impl<K: Send + 'static> EventSource<K> for WatchEventSource<K> {
    async fn next(&mut self) -> Option<Event<K>> {
        while !self.stopped {
            match self.stream.next().await? {
                Ok(watcher::Event::Init) => self.seen_in_relist = false,
                Ok(watcher::Event::InitApply(obj)) => {
                    self.seen_in_relist = true;
                    return Some(self.upsert(obj));
                }
                Ok(watcher::Event::InitDone) => {
                    if self.present && !self.seen_in_relist {
                        self.present = false;
                        return Some(Event::Deleted);
                    }
                }
                Ok(watcher::Event::Apply(obj)) => return Some(self.upsert(obj)),
                Ok(watcher::Event::Delete(_)) => {
                    self.present = false;
                    return Some(Event::Deleted);
                }
                Err(err) => return Some(Event::Error(err.to_string())),
            }
        }
        None
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(version: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some("holder".to_string()),
                resource_version: Some(version.to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    fn source(events: Vec<watcher::Event<Secret>>) -> WatchEventSource<Secret> {
        WatchEventSource::new(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    #[tokio::test]
    async fn test_initial_list_maps_to_added_then_modified() {
        let mut source = source(vec![
            watcher::Event::Init,
            watcher::Event::InitApply(secret("1")),
            watcher::Event::InitDone,
            watcher::Event::Apply(secret("2")),
        ]);

        assert_eq!(source.next().await, Some(Event::Added(secret("1"))));
        assert_eq!(source.next().await, Some(Event::Modified(secret("2"))));
        assert_eq!(source.next().await, None);
    }

    #[tokio::test]
    async fn test_relist_without_object_reports_deletion() {
        let mut source = source(vec![
            watcher::Event::Apply(secret("1")),
            watcher::Event::Init,
            watcher::Event::InitDone,
        ]);

        assert_eq!(source.next().await, Some(Event::Added(secret("1"))));
        assert_eq!(source.next().await, Some(Event::Deleted));
    }

    #[tokio::test]
    async fn test_delete_event_maps_to_deleted() {
        let mut source = source(vec![
            watcher::Event::Apply(secret("1")),
            watcher::Event::Delete(secret("1")),
        ]);

        assert_eq!(source.next().await, Some(Event::Added(secret("1"))));
        assert_eq!(source.next().await, Some(Event::Deleted));
    }

    #[tokio::test]
    async fn test_stopped_source_yields_nothing() {
        let mut source = source(vec![watcher::Event::Apply(secret("1"))]);
        source.stop();
        source.stop();
        assert_eq!(source.next().await, None);
    }
}
