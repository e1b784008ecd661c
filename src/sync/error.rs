//! # Synchronizer Errors

use super::client::ClientError;
use thiserror::Error;

/// Errors produced by synchronizers and their supervisor
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("synchronizer {0} is already running")]
    AlreadyRunning(String),

    #[error("synchronizer {0} is already supervised")]
    AlreadySupervised(String),

    #[error("action handlers for synchronizer {0} must be registered before it starts")]
    HandlersFrozen(String),

    #[error("watch on {name} failed: {message}")]
    Watch { name: String, message: String },

    #[error("event stream for {0} closed")]
    StreamClosed(String),

    #[error("synchronizer {expected} received an event for unexpected object {actual}")]
    UnexpectedObject { expected: String, actual: String },

    #[error("handler on {name} failed: {message}")]
    Handler { name: String, message: String },

    /// The system cannot continue; never restarted by the supervisor
    #[error("fatal synchronizer failure on {name}: {message}")]
    Fatal { name: String, message: String },
}

impl SyncError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Fatal { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, SyncError::Client(err) if err.is_already_exists())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Client(err) if err.is_not_found())
    }
}
