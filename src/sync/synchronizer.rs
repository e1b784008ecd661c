//! # Object Synchronizer
//!
//! Keeps a locally cached copy of exactly one named object, exposes create/update/
//! delete/get against the backend, and dispatches registered handlers for events.
//!
//! ## Event processing
//!
//! Events are processed strictly in delivery order on one background task. For each
//! event the handlers registered for its type run first, in registration order, and
//! then the cache is updated:
//!
//! - `Added`/`Modified` replace the cache. An object identical to the cache is
//!   dropped before dispatch, which is what makes periodic polls free.
//! - `Deleted` clears the cache. It is dispatched even when the cache is already
//!   empty, so a handler that re-creates the object keeps trying on every poll.
//! - `Error` terminates the loop and is reported on the error channel.
//!
//! A native watch only reports changes made after it was opened. When a watch loop
//! (re)starts with a cached object that is gone from the backend, the deletion is
//! dispatched before the first watch event.
//!
//! The loop is never restarted from here; that is the supervisor's decision.

use super::client::ObjectClient;
use super::error::SyncError;
use super::event::{Event, EventSource, EventType};
use super::lock;
use super::poller::PollEventSource;
use crate::observability::metrics;
use async_trait::async_trait;
use kube::ResourceExt;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// How a synchronizer observes its object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Native watch provided by the backend
    Watch,
    /// Fetch the object on a fixed interval
    Poll(Duration),
}

/// Callback invoked by the synchronizer for the event types it was registered for.
///
/// Handlers receive the synchronizer so they can write back to the backend
/// (for example to re-publish an object that was deleted).
#[async_trait]
pub trait ActionHandler<C: ObjectClient>: Send + Sync {
    /// Returning an error terminates the event loop with that error.
    async fn handle(
        &self,
        event: &Event<C::Object>,
        synchronizer: &Synchronizer<C>,
    ) -> Result<(), SyncError>;
}

struct Registration<C: ObjectClient> {
    handler: Arc<dyn ActionHandler<C>>,
    event_types: Vec<EventType>,
}

/// Cached mirror of one named, namespaced object
pub struct Synchronizer<C: ObjectClient> {
    namespace: String,
    name: String,
    client: Arc<C>,
    mode: SyncMode,
    cache: Mutex<Option<C::Object>>,
    handlers: Mutex<Vec<Registration<C>>>,
    handlers_frozen: AtomicBool,
    running: AtomicBool,
    shutdown: watch::Sender<bool>,
    errors_tx: mpsc::UnboundedSender<SyncError>,
    errors_rx: Mutex<Option<mpsc::UnboundedReceiver<SyncError>>>,
}

impl<C: ObjectClient> fmt::Debug for Synchronizer<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("namespace", &self.namespace)
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<C: ObjectClient> Synchronizer<C> {
    pub fn new(client: Arc<C>, namespace: &str, name: &str, mode: SyncMode) -> Arc<Self> {
        let (errors_tx, errors_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            client,
            mode,
            cache: Mutex::new(None),
            handlers: Mutex::new(Vec::new()),
            handlers_frozen: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown,
            errors_tx,
            errors_rx: Mutex::new(Some(errors_rx)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// `namespace/name`, used in logs and as the supervisor registry key
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current cache content without touching the backend
    pub fn cached(&self) -> Option<C::Object> {
        lock(&self.cache).clone()
    }

    /// Cached object, fetched synchronously if the cache was never populated.
    ///
    /// Returns `None` if the object cannot be fetched (typically because it does not
    /// exist yet).
    pub async fn get(&self) -> Option<C::Object> {
        if let Some(obj) = self.cached() {
            return Some(obj);
        }
        match self.client.get(&self.namespace, &self.name).await {
            Ok(obj) => {
                *lock(&self.cache) = Some(obj.clone());
                Some(obj)
            }
            Err(err) => {
                debug!(
                    secret.namespace = %self.namespace,
                    secret.name = %self.name,
                    error = %err,
                    "Synchronized object not available"
                );
                None
            }
        }
    }

    /// Re-fetch the object, bypassing the event stream, and replace the cache
    pub async fn refresh(&self) -> Result<Option<C::Object>, SyncError> {
        match self.client.get(&self.namespace, &self.name).await {
            Ok(obj) => {
                *lock(&self.cache) = Some(obj.clone());
                Ok(Some(obj))
            }
            Err(err) if err.is_not_found() => {
                *lock(&self.cache) = None;
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Create the object in the backend.
    ///
    /// The cache is populated by the resulting event, not by this call. Callers doing
    /// idempotent initialization should accept [`SyncError::is_already_exists`].
    pub async fn create(&self, obj: &C::Object) -> Result<C::Object, SyncError> {
        Ok(self.client.create(&self.namespace, obj).await?)
    }

    pub async fn update(&self, obj: &C::Object) -> Result<C::Object, SyncError> {
        Ok(self.client.update(&self.namespace, obj).await?)
    }

    /// Delete the object with a zero grace period
    pub async fn delete(&self) -> Result<(), SyncError> {
        Ok(self.client.delete(&self.namespace, &self.name).await?)
    }

    /// Register `handler` for the given event types.
    ///
    /// Handlers must be registered before the first [`Synchronizer::start`]; later
    /// registrations are rejected with [`SyncError::HandlersFrozen`].
    pub fn register_action_handler(
        &self,
        handler: Arc<dyn ActionHandler<C>>,
        event_types: &[EventType],
    ) -> Result<(), SyncError> {
        let mut handlers = lock(&self.handlers);
        if self.handlers_frozen.load(Ordering::SeqCst) {
            return Err(SyncError::HandlersFrozen(self.qualified_name()));
        }
        handlers.push(Registration {
            handler,
            event_types: event_types.to_vec(),
        });
        Ok(())
    }

    /// Start the event loop on a background task.
    ///
    /// Fails with [`SyncError::AlreadyRunning`] while a loop is active. Once the loop
    /// has exited (error or [`Synchronizer::stop`]) it can be started again.
    pub fn start(self: &Arc<Self>) -> Result<(), SyncError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyRunning(self.qualified_name()));
        }
        {
            let _handlers = lock(&self.handlers);
            self.handlers_frozen.store(true, Ordering::SeqCst);
        }
        self.shutdown.send_replace(false);
        let shutdown = self.shutdown.subscribe();

        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(
                secret.namespace = %this.namespace,
                secret.name = %this.name,
                mode = ?this.mode,
                "Starting synchronizer"
            );
            let outcome = this.run(shutdown).await;
            this.running.store(false, Ordering::SeqCst);

            match outcome {
                Ok(()) => info!(
                    secret.namespace = %this.namespace,
                    secret.name = %this.name,
                    "Synchronizer stopped"
                ),
                Err(err) => {
                    error!(
                        secret.namespace = %this.namespace,
                        secret.name = %this.name,
                        error = %err,
                        "Synchronizer terminated"
                    );
                    if this.errors_tx.send(err).is_err() {
                        debug!("Synchronizer error channel has no listener");
                    }
                }
            }
        });
        Ok(())
    }

    /// Stop a running event loop. No-op when the loop is not running.
    pub fn stop(&self) {
        self.shutdown.send_replace(true);
    }

    /// Hand out the error channel. Only the first caller receives it.
    pub fn take_error_channel(&self) -> Option<mpsc::UnboundedReceiver<SyncError>> {
        lock(&self.errors_rx).take()
    }

    /// Report a failure observed outside the event loop (for example by a handler's
    /// owner calling the backend directly) and stop the loop.
    ///
    /// The error reaches the supervisor exactly like a loop failure would.
    pub fn fail(&self, err: SyncError) {
        error!(
            secret.namespace = %self.namespace,
            secret.name = %self.name,
            error = %err,
            "Synchronizer failed outside its event loop"
        );
        self.stop();
        if self.errors_tx.send(err).is_err() {
            debug!("Synchronizer error channel has no listener");
        }
    }

    async fn open_source(&self) -> Result<Box<dyn EventSource<C::Object>>, SyncError> {
        match self.mode {
            SyncMode::Watch => Ok(self.client.watch(&self.namespace, &self.name).await?),
            SyncMode::Poll(interval) => Ok(Box::new(PollEventSource::poll(
                Arc::clone(&self.client),
                &self.namespace,
                &self.name,
                interval,
            ))),
        }
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        let mut source = self.open_source().await?;

        if self.mode == SyncMode::Watch {
            if let Err(err) = self.reconcile_missed_deletion().await {
                source.stop();
                return Err(err);
            }
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => {
                    source.stop();
                    return Ok(());
                }
                event = source.next() => event,
            };

            let Some(event) = event else {
                return Err(SyncError::StreamClosed(self.qualified_name()));
            };

            if let Err(err) = self.process(event).await {
                source.stop();
                return Err(err);
            }
        }
    }

    async fn process(&self, event: Event<C::Object>) -> Result<(), SyncError> {
        let event_type = event.event_type();
        metrics::increment_sync_events(&self.qualified_name(), event_type.as_str());

        match &event {
            Event::Added(obj) | Event::Modified(obj) => {
                self.verify_identity(obj)?;
                if lock(&self.cache).as_ref() == Some(obj) {
                    debug!(
                        secret.name = %self.name,
                        event = %event_type,
                        "Object unchanged, skipping dispatch"
                    );
                    return Ok(());
                }
                self.dispatch(&event).await?;
                *lock(&self.cache) = Some(obj.clone());
            }
            Event::Deleted => {
                self.dispatch(&event).await?;
                *lock(&self.cache) = None;
            }
            Event::Error(message) => {
                warn!(secret.name = %self.name, error = %message, "Event source reported an error");
                self.dispatch(&event).await?;
                return Err(SyncError::Watch {
                    name: self.qualified_name(),
                    message: message.clone(),
                });
            }
        }
        Ok(())
    }

    /// Dispatch `Deleted` if the cached object vanished while no watch was open.
    ///
    /// Called after the watch is open, so a re-creation racing with this check is
    /// still delivered by the watch.
    async fn reconcile_missed_deletion(&self) -> Result<(), SyncError> {
        if self.cached().is_none() {
            return Ok(());
        }
        match self.client.get(&self.namespace, &self.name).await {
            Err(err) if err.is_not_found() => {
                info!(
                    secret.namespace = %self.namespace,
                    secret.name = %self.name,
                    "Object deleted while the watch was down"
                );
                self.process(Event::Deleted).await
            }
            // Present, or unknown: the watch reports either
            Ok(_) | Err(_) => Ok(()),
        }
    }

    fn verify_identity(&self, obj: &C::Object) -> Result<(), SyncError> {
        let name_matches = obj.name_any() == self.name;
        let namespace_matches = match obj.namespace() {
            Some(namespace) => namespace == self.namespace,
            None => true,
        };
        if name_matches && namespace_matches {
            Ok(())
        } else {
            Err(SyncError::UnexpectedObject {
                expected: self.qualified_name(),
                actual: format!(
                    "{}/{}",
                    obj.namespace().unwrap_or_default(),
                    obj.name_any()
                ),
            })
        }
    }

    async fn dispatch(&self, event: &Event<C::Object>) -> Result<(), SyncError> {
        let event_type = event.event_type();
        let handlers: Vec<Arc<dyn ActionHandler<C>>> = lock(&self.handlers)
            .iter()
            .filter(|registration| registration.event_types.contains(&event_type))
            .map(|registration| Arc::clone(&registration.handler))
            .collect();

        for handler in handlers {
            handler.handle(event, self).await?;
        }
        Ok(())
    }
}

// Not imported by name: `Supervised::start` takes `Arc<Self>` and would shadow the
// inherent `start` in method calls on an `Arc<Synchronizer>`.
impl<C: ObjectClient> super::overwatch::Supervised for Synchronizer<C> {
    fn name(&self) -> String {
        self.qualified_name()
    }

    fn start(self: Arc<Self>) -> Result<(), SyncError> {
        Synchronizer::start(&self)
    }

    fn stop(&self) {
        Synchronizer::stop(self);
    }

    fn take_error_channel(&self) -> Option<mpsc::UnboundedReceiver<SyncError>> {
        Synchronizer::take_error_channel(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::client::ClientError;
    use crate::sync::memory::{MemoryObjectClient, Operation};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use k8s_openapi::ByteString;
    use std::collections::BTreeMap;
    use tokio::time::{sleep, timeout};

    type Store = MemoryObjectClient<Secret>;

    fn secret(name: &str, value: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..ObjectMeta::default()
            },
            data: Some(BTreeMap::from([(
                "value".to_string(),
                ByteString(value.as_bytes().to_vec()),
            )])),
            ..Secret::default()
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventType>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<EventType> {
            lock(&self.seen).clone()
        }
    }

    #[async_trait]
    impl ActionHandler<Store> for Recorder {
        async fn handle(
            &self,
            event: &Event<Secret>,
            _synchronizer: &Synchronizer<Store>,
        ) -> Result<(), SyncError> {
            lock(&self.seen).push(event.event_type());
            Ok(())
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        timeout(Duration::from_secs(5), async {
            while !condition() {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not met in time");
    }

    #[tokio::test]
    async fn test_get_fetches_and_caches() {
        let store = Arc::new(Store::new());
        store.create("ns", &secret("holder", "a")).await.unwrap();
        let sync = Synchronizer::new(Arc::clone(&store), "ns", "holder", SyncMode::Watch);

        assert!(sync.cached().is_none());
        assert!(sync.get().await.is_some());
        assert!(sync.get().await.is_some());
        assert_eq!(store.calls(Operation::Get), 1);
    }

    #[tokio::test]
    async fn test_get_returns_none_for_missing_object() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);
        assert!(sync.get().await.is_none());
    }

    #[tokio::test]
    async fn test_second_start_fails_fast() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);

        sync.start().unwrap();
        assert!(matches!(sync.start(), Err(SyncError::AlreadyRunning(_))));
        sync.stop();
    }

    #[tokio::test]
    async fn test_registration_after_start_is_rejected() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);
        sync.start().unwrap();

        let result = sync.register_action_handler(Arc::new(Recorder::default()), &[EventType::Added]);
        assert!(matches!(result, Err(SyncError::HandlersFrozen(_))));
        sync.stop();
    }

    #[tokio::test]
    async fn test_dispatches_by_event_type_and_updates_cache() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(Arc::clone(&store), "ns", "holder", SyncMode::Watch);
        let upserts = Arc::new(Recorder::default());
        let deletes = Arc::new(Recorder::default());
        sync.register_action_handler(
            Arc::clone(&upserts) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Added, EventType::Modified],
        )
        .unwrap();
        sync.register_action_handler(
            Arc::clone(&deletes) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Deleted],
        )
        .unwrap();
        sync.start().unwrap();

        store.create("ns", &secret("holder", "a")).await.unwrap();
        wait_until(|| sync.cached().is_some()).await;

        store.update("ns", &secret("holder", "b")).await.unwrap();
        wait_until(|| upserts.seen().len() == 2).await;

        store.delete("ns", "holder").await.unwrap();
        wait_until(|| deletes.seen().len() == 1).await;
        wait_until(|| sync.cached().is_none()).await;

        assert_eq!(upserts.seen(), vec![EventType::Added, EventType::Modified]);
        sync.stop();
    }

    #[tokio::test]
    async fn test_poll_does_not_redispatch_unchanged_object() {
        let store = Arc::new(Store::new());
        store.create("ns", &secret("holder", "a")).await.unwrap();
        let sync = Synchronizer::new(
            Arc::clone(&store),
            "ns",
            "holder",
            SyncMode::Poll(Duration::from_millis(10)),
        );
        let recorder = Arc::new(Recorder::default());
        sync.register_action_handler(
            Arc::clone(&recorder) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Added, EventType::Modified],
        )
        .unwrap();
        sync.start().unwrap();

        wait_until(|| store.calls(Operation::Get) >= 5).await;
        assert_eq!(recorder.seen(), vec![EventType::Added]);
        sync.stop();
    }

    #[tokio::test]
    async fn test_error_event_terminates_loop_and_reports() {
        let store = Arc::new(Store::new());
        store.inject_failure(Operation::Get, ClientError::Unavailable("etcd down".into()));
        let sync = Synchronizer::new(
            Arc::clone(&store),
            "ns",
            "holder",
            SyncMode::Poll(Duration::from_millis(10)),
        );
        let mut errors = sync.take_error_channel().unwrap();
        sync.start().unwrap();

        let err = timeout(Duration::from_secs(5), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(err, SyncError::Watch { .. }));
        wait_until(|| !sync.is_running()).await;

        // A terminated loop may be started again
        sync.start().unwrap();
        sync.stop();
    }

    #[tokio::test]
    async fn test_unexpected_object_is_rejected() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);
        let recorder = Arc::new(Recorder::default());
        sync.register_action_handler(
            Arc::clone(&recorder) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Added],
        )
        .unwrap();

        let err = sync.process(Event::Added(secret("intruder", "a"))).await;
        assert!(matches!(err, Err(SyncError::UnexpectedObject { .. })));
        assert!(sync.cached().is_none());
        assert!(recorder.seen().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_clears_cache_when_object_is_gone() {
        let store = Arc::new(Store::new());
        store.create("ns", &secret("holder", "a")).await.unwrap();
        let sync = Synchronizer::new(Arc::clone(&store), "ns", "holder", SyncMode::Watch);
        assert!(sync.get().await.is_some());

        store.delete("ns", "holder").await.unwrap();
        assert!(sync.refresh().await.unwrap().is_none());
        assert!(sync.cached().is_none());
    }

    #[tokio::test]
    async fn test_deleted_is_dispatched_with_empty_cache() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);
        let recorder = Arc::new(Recorder::default());
        sync.register_action_handler(
            Arc::clone(&recorder) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Deleted],
        )
        .unwrap();

        sync.process(Event::Deleted).await.unwrap();
        sync.process(Event::Deleted).await.unwrap();
        assert_eq!(recorder.seen(), vec![EventType::Deleted, EventType::Deleted]);
    }

    #[tokio::test]
    async fn test_watch_restart_dispatches_deletion_missed_while_stopped() {
        let store = Arc::new(Store::new());
        store.create("ns", &secret("holder", "a")).await.unwrap();
        let sync = Synchronizer::new(Arc::clone(&store), "ns", "holder", SyncMode::Watch);
        let recorder = Arc::new(Recorder::default());
        sync.register_action_handler(
            Arc::clone(&recorder) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Deleted],
        )
        .unwrap();

        sync.start().unwrap();
        wait_until(|| sync.cached().is_some()).await;
        sync.stop();
        wait_until(|| !sync.is_running()).await;

        store.delete("ns", "holder").await.unwrap();
        sync.start().unwrap();

        wait_until(|| recorder.seen() == vec![EventType::Deleted]).await;
        wait_until(|| sync.cached().is_none()).await;
        sync.stop();
    }

    #[tokio::test]
    async fn test_watch_restart_without_deletion_dispatches_nothing() {
        let store = Arc::new(Store::new());
        store.create("ns", &secret("holder", "a")).await.unwrap();
        let sync = Synchronizer::new(Arc::clone(&store), "ns", "holder", SyncMode::Watch);
        let recorder = Arc::new(Recorder::default());
        sync.register_action_handler(
            Arc::clone(&recorder) as Arc<dyn ActionHandler<Store>>,
            &[EventType::Added, EventType::Deleted],
        )
        .unwrap();
        assert!(sync.get().await.is_some());

        sync.start().unwrap();
        wait_until(|| store.calls(Operation::Get) >= 2).await;
        sleep(Duration::from_millis(50)).await;

        assert!(recorder.seen().is_empty());
        sync.stop();
    }

    #[tokio::test]
    async fn test_fail_reports_error_and_stops_loop() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);
        let mut errors = sync.take_error_channel().unwrap();
        sync.start().unwrap();

        sync.fail(SyncError::Fatal {
            name: "ns/holder".into(),
            message: "cannot recreate".into(),
        });

        let err = timeout(Duration::from_secs(5), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.is_fatal());
        wait_until(|| !sync.is_running()).await;
    }

    #[test]
    fn test_error_channel_is_handed_out_once() {
        let store = Arc::new(Store::new());
        let sync = Synchronizer::new(store, "ns", "holder", SyncMode::Watch);
        assert!(sync.take_error_channel().is_some());
        assert!(sync.take_error_channel().is_none());
    }
}
