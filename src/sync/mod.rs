//! # Object Synchronization
//!
//! Mirrors a single named Kubernetes object locally and reacts to its changes.
//!
//! ## Sub-modules
//!
//! - `client` - Backend object store abstraction (`ObjectClient`) and its errors
//! - `event` - Tagged watch events and the `EventSource` stream abstraction
//! - `kube_client` - `ObjectClient` over `kube::Api<Secret>` with a native watch
//! - `memory` - Process-local `ObjectClient` used outside a cluster and in tests
//! - `poller` - Poll-based `EventSource` that synthesizes watch events
//! - `synchronizer` - Cached mirror of one object with event handler dispatch
//! - `overwatch` - Supervisor that restarts failed synchronizers

pub mod client;
pub mod error;
pub mod event;
pub mod kube_client;
pub mod memory;
pub mod overwatch;
pub mod poller;
pub mod synchronizer;

pub use client::{ClientError, ObjectClient};
pub use error::SyncError;
pub use event::{Event, EventSource, EventType};
pub use kube_client::KubeSecretClient;
pub use memory::{MemoryObjectClient, Operation};
pub use overwatch::{Overwatch, RestartPolicy, Supervised};
pub use poller::PollEventSource;
pub use synchronizer::{ActionHandler, SyncMode, Synchronizer};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if a previous holder panicked.
///
/// Every critical section in this module replaces or clones a value and never
/// leaves it half-written, so a poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
