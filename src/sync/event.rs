//! # Watch Events
//!
//! Events flowing from an event source (native watch or poller) into a synchronizer.

use async_trait::async_trait;
use std::fmt;

/// A change observed on the synchronized object
#[derive(Debug, Clone, PartialEq)]
pub enum Event<K> {
    /// The object was observed for the first time (or re-observed by a poll)
    Added(K),
    /// The object changed
    Modified(K),
    /// The object no longer exists
    Deleted,
    /// The event source failed; terminal for the consuming loop
    Error(String),
}

impl<K> Event<K> {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Added(_) => EventType::Added,
            Event::Modified(_) => EventType::Modified,
            Event::Deleted => EventType::Deleted,
            Event::Error(_) => EventType::Error,
        }
    }

    /// The object carried by the event, if any
    pub fn object(&self) -> Option<&K> {
        match self {
            Event::Added(obj) | Event::Modified(obj) => Some(obj),
            Event::Deleted | Event::Error(_) => None,
        }
    }
}

/// Discriminant of [`Event`], used when registering handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Added,
    Modified,
    Deleted,
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Added => "ADDED",
            EventType::Modified => "MODIFIED",
            EventType::Deleted => "DELETED",
            EventType::Error => "ERROR",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stoppable stream of events for one object.
///
/// The synchronizer consumes native watches and pollers through this trait and
/// cannot tell them apart.
#[async_trait]
pub trait EventSource<K>: Send {
    /// Next event, or `None` once the source is exhausted or stopped
    async fn next(&mut self) -> Option<Event<K>>;

    /// Stop producing events. Calling this more than once is a no-op.
    fn stop(&mut self);
}
