//! # Poll-based Watcher
//!
//! Simulates a watch stream by fetching the object on a fixed interval. Used where a
//! long-lived watch on the API server is not wanted.
//!
//! Every successful fetch is reported as `Added`; the synchronizer drops events whose
//! object is identical to its cache, so an unchanged object costs nothing downstream.
//! A `NotFound` fetch becomes `Deleted` rather than a terminal error, letting
//! consumers treat disappearance as deletion.

use super::client::ObjectClient;
use super::event::{Event, EventSource};
use crate::runtime::backoff::delay_millis;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Buffered events between the polling task and the consumer
const POLL_CHANNEL_CAPACITY: usize = 16;

/// Shortest accepted poll interval; anything below is raised to it
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Event source fed by a background polling task
#[derive(Debug)]
pub struct PollEventSource<K> {
    events: mpsc::Receiver<Event<K>>,
    stop: watch::Sender<bool>,
}

impl<K: Send + 'static> PollEventSource<K> {
    /// Start polling `namespace/name` every `interval`.
    ///
    /// The first fetch happens immediately. An interval below [`MIN_POLL_INTERVAL`]
    /// is raised to it. Must be called within a tokio runtime.
    pub fn poll<C>(client: Arc<C>, namespace: &str, name: &str, interval: Duration) -> Self
    where
        C: ObjectClient<Object = K>,
    {
        if interval < MIN_POLL_INTERVAL {
            warn!(
                secret.namespace = %namespace,
                secret.name = %name,
                interval_ms = delay_millis(interval),
                min_interval_ms = delay_millis(MIN_POLL_INTERVAL),
                "Poll interval too short, using the minimum"
            );
        }
        let interval = interval.max(MIN_POLL_INTERVAL);
        let (tx, events) = mpsc::channel(POLL_CHANNEL_CAPACITY);
        let (stop, mut stopped) = watch::channel(false);
        let namespace = namespace.to_string();
        let name = name.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.wait_for(|stopped| *stopped) => break,
                    _ = ticker.tick() => {}
                }

                let event = match client.get(&namespace, &name).await {
                    Ok(obj) => Event::Added(obj),
                    Err(err) if err.is_not_found() => Event::Deleted,
                    Err(err) => Event::Error(err.to_string()),
                };

                // A closed receiver means the consumer went away
                if tx.send(event).await.is_err() {
                    break;
                }
            }

            debug!(
                secret.namespace = %namespace,
                secret.name = %name,
                "Poller stopped"
            );
        });

        Self { events, stop }
    }
}

#[async_trait]
impl<K: Send + 'static> EventSource<K> for PollEventSource<K> {
    async fn next(&mut self) -> Option<Event<K>> {
        if *self.stop.borrow() {
            return None;
        }
        self.events.recv().await
    }

    fn stop(&mut self) {
        self.stop.send_replace(true);
        self.events.close();
    }
}

impl<K> Drop for PollEventSource<K> {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::client::ClientError;
    use crate::sync::memory::{MemoryObjectClient, Operation};
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn secret(name: &str) -> Secret {
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns".to_string()),
                ..ObjectMeta::default()
            },
            ..Secret::default()
        }
    }

    #[tokio::test]
    async fn test_poll_emits_deleted_when_object_missing() {
        let client = Arc::new(MemoryObjectClient::<Secret>::new());
        let mut source =
            PollEventSource::poll(client, "ns", "holder", Duration::from_millis(10));

        assert_eq!(source.next().await, Some(Event::Deleted));
        source.stop();
    }

    #[tokio::test]
    async fn test_poll_emits_added_for_existing_object() {
        let client = Arc::new(MemoryObjectClient::<Secret>::new());
        client.create("ns", &secret("holder")).await.unwrap();

        let mut source =
            PollEventSource::poll(Arc::clone(&client), "ns", "holder", Duration::from_millis(10));

        match source.next().await {
            Some(Event::Added(obj)) => assert_eq!(obj.metadata.name.as_deref(), Some("holder")),
            other => panic!("expected Added, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_reports_backend_failure_as_error_event() {
        let client = Arc::new(MemoryObjectClient::<Secret>::new());
        client.inject_failure(Operation::Get, ClientError::Unavailable("connection refused".into()));

        let mut source = PollEventSource::poll(client, "ns", "holder", Duration::from_millis(10));

        match source.next().await {
            Some(Event::Error(message)) => assert!(message.contains("connection refused")),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_interval_is_raised_to_minimum() {
        let client = Arc::new(MemoryObjectClient::<Secret>::new());
        let mut source =
            PollEventSource::poll(Arc::clone(&client), "ns", "holder", Duration::ZERO);

        assert_eq!(source.next().await, Some(Event::Deleted));
        assert_eq!(source.next().await, Some(Event::Deleted));
        source.stop();
        assert!(client.calls(Operation::Get) >= 2);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let client = Arc::new(MemoryObjectClient::<Secret>::new());
        let mut source = PollEventSource::poll(client, "ns", "holder", Duration::from_millis(10));

        source.stop();
        source.stop();
        assert_eq!(source.next().await, None);
    }
}
