//! # Error Policy
//!
//! Classifies synchronizer failures and decides how long the supervisor waits before
//! restarting the failed event loop.
//!
//! Watch failures from the API server surface as text, so classification matches on
//! status codes and reason strings as well as on typed client errors.

use super::backoff::{delay_millis, FibonacciBackoff};
use crate::sync::{ClientError, SyncError};
use std::time::Duration;
use tracing::{error, warn};

/// How a synchronizer failure should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The system cannot continue; never restart
    Fatal,
    /// Credentials rejected; RBAC may have been revoked
    Unauthorized,
    /// Resource version expired; restart immediately
    Expired,
    /// API server asked us to slow down
    Throttled,
    /// Anything else
    Transient,
}

pub fn classify(err: &SyncError) -> ErrorClass {
    match err {
        SyncError::Fatal { .. } => ErrorClass::Fatal,
        SyncError::Client(ClientError::Api { code: 401, .. }) => ErrorClass::Unauthorized,
        SyncError::Client(ClientError::Api { code: 410, .. }) => ErrorClass::Expired,
        SyncError::Client(ClientError::Api { code: 429, .. }) => ErrorClass::Throttled,
        SyncError::Watch { message, .. } | SyncError::Handler { message, .. } => {
            classify_message(message)
        }
        SyncError::Client(ClientError::Unavailable(message)) => classify_message(message),
        _ => ErrorClass::Transient,
    }
}

fn classify_message(message: &str) -> ErrorClass {
    let is_401 = message.contains("401") || message.contains("Unauthorized");
    let is_410 = message.contains("410")
        || message.contains("too old resource version")
        || message.contains("Expired")
        || message.contains("Gone");
    let is_429 = message.contains("429")
        || message.contains("storage is (re)initializing")
        || message.contains("TooManyRequests");

    if is_401 {
        ErrorClass::Unauthorized
    } else if is_410 {
        ErrorClass::Expired
    } else if is_429 {
        ErrorClass::Throttled
    } else {
        ErrorClass::Transient
    }
}

/// Delay before restarting after `err`, or `None` if it must not be restarted.
///
/// Expired watches restart immediately and reset the backoff; all other
/// recoverable failures advance it.
pub fn restart_delay(name: &str, err: &SyncError, backoff: &mut FibonacciBackoff) -> Option<Duration> {
    match classify(err) {
        ErrorClass::Fatal => {
            error!(synchronizer = %name, error = %err, "Fatal synchronizer failure, not restarting");
            None
        }
        ErrorClass::Expired => {
            warn!(
                synchronizer = %name,
                error = %err,
                "Watch expired, restarting immediately"
            );
            backoff.reset();
            Some(Duration::ZERO)
        }
        ErrorClass::Unauthorized => {
            let delay = backoff.next_backoff();
            error!(
                synchronizer = %name,
                error = %err,
                "Synchronizer unauthorized (401), RBAC may have been revoked or the token expired"
            );
            error!("Verify the ServiceAccount can still get, create, update and delete the key holder Secret:");
            error!("   kubectl auth can-i get secrets --as=system:serviceaccount:<namespace>:<service-account> -n <namespace>");
            warn!(synchronizer = %name, delay_ms = delay_millis(delay), "Retrying after backoff");
            Some(delay)
        }
        ErrorClass::Throttled => {
            let delay = backoff.next_backoff();
            warn!(
                synchronizer = %name,
                delay_ms = delay_millis(delay),
                "API server throttling (429), backing off before restart"
            );
            Some(delay)
        }
        ErrorClass::Transient => {
            let delay = backoff.next_backoff();
            warn!(
                synchronizer = %name,
                error = %err,
                delay_ms = delay_millis(delay),
                "Synchronizer failed, restarting after backoff"
            );
            Some(delay)
        }
    }
}
