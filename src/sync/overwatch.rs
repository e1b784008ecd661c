//! # Overwatch
//!
//! Supervisor for synchronizers. Constructed once at startup and handed to every
//! component that owns a synchronizer.
//!
//! Each registered synchronizer gets a monitoring task reading its error channel.
//! When the synchronizer's loop fails, the monitor classifies the error
//! (see [`crate::runtime::error_policy`]), waits out the backoff and sends a restart
//! request to the single dispatch task, which calls `start` again.
//!
//! A fatal error is never restarted; it raises the process-wide fatal signal
//! observed through [`Overwatch::wait_fatal`].

use super::error::SyncError;
use super::lock;
use crate::config::SupervisorConfig;
use crate::observability::metrics;
use crate::runtime::backoff::FibonacciBackoff;
use crate::runtime::error_policy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// What the supervisor does when a synchronizer exits with an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    AlwaysRestart,
    NeverRestart,
}

/// A long-running loop the supervisor can start, stop and observe
pub trait Supervised: Send + Sync + 'static {
    /// Unique name, used as the registry key
    fn name(&self) -> String;

    fn start(self: Arc<Self>) -> Result<(), SyncError>;

    fn stop(&self);

    /// Channel on which each loop failure is reported, handed out once
    fn take_error_channel(&self) -> Option<mpsc::UnboundedReceiver<SyncError>>;
}

struct Registration {
    synchronizer: Arc<dyn Supervised>,
    policy: RestartPolicy,
    restarts: u64,
}

type Registry = Arc<Mutex<HashMap<String, Registration>>>;

/// Process-wide synchronizer supervisor
pub struct Overwatch {
    config: SupervisorConfig,
    registry: Registry,
    restart_tx: mpsc::UnboundedSender<String>,
    shutdown: watch::Sender<bool>,
    fatal: watch::Sender<Option<String>>,
}

impl fmt::Debug for Overwatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overwatch")
            .field("config", &self.config)
            .field("registered", &self.registered())
            .finish_non_exhaustive()
    }
}

impl Overwatch {
    /// Create the supervisor and spawn its dispatch task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(config: SupervisorConfig) -> Arc<Self> {
        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        let (fatal, _) = watch::channel(None);

        tokio::spawn(dispatch(
            Arc::clone(&registry),
            restart_rx,
            shutdown.subscribe(),
        ));

        Arc::new(Self {
            config,
            registry,
            restart_tx,
            shutdown,
            fatal,
        })
    }

    /// Start `synchronizer` and supervise it with `policy`.
    ///
    /// Registering a name that is already supervised is a logged no-op.
    pub fn register_synchronizer<S: Supervised>(
        &self,
        synchronizer: Arc<S>,
        policy: RestartPolicy,
    ) -> Result<(), SyncError> {
        let name = synchronizer.name();
        let synchronizer: Arc<dyn Supervised> = synchronizer;

        let errors = {
            let mut registry = lock(&self.registry);
            if registry.contains_key(&name) {
                warn!(synchronizer = %name, "Synchronizer already registered, ignoring");
                return Ok(());
            }
            let Some(errors) = synchronizer.take_error_channel() else {
                return Err(SyncError::AlreadySupervised(name));
            };
            registry.insert(
                name.clone(),
                Registration {
                    synchronizer: Arc::clone(&synchronizer),
                    policy,
                    restarts: 0,
                },
            );
            errors
        };

        match Arc::clone(&synchronizer).start() {
            Ok(()) | Err(SyncError::AlreadyRunning(_)) => {}
            Err(err) => {
                lock(&self.registry).remove(&name);
                return Err(err);
            }
        }

        info!(synchronizer = %name, policy = ?policy, "Synchronizer registered");
        tokio::spawn(monitor(
            name,
            policy,
            errors,
            self.config.clone(),
            self.restart_tx.clone(),
            self.shutdown.subscribe(),
            self.fatal.clone(),
        ));
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        lock(&self.registry).contains_key(name)
    }

    /// Names of all supervised synchronizers, sorted
    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = lock(&self.registry).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn policy(&self, name: &str) -> Option<RestartPolicy> {
        lock(&self.registry).get(name).map(|r| r.policy)
    }

    /// How often `name` has been restarted after a failure
    pub fn restart_count(&self, name: &str) -> Option<u64> {
        lock(&self.registry).get(name).map(|r| r.restarts)
    }

    /// Message of the fatal error, if one was raised
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.borrow().clone()
    }

    /// Resolve once a supervised synchronizer fails fatally
    pub async fn wait_fatal(&self) -> String {
        let mut fatal = self.fatal.subscribe();
        let message = fatal
            .wait_for(Option::is_some)
            .await
            .map(|message| message.clone().unwrap_or_default());
        match message {
            Ok(message) => message,
            // Unreachable while `self` holds the sender
            Err(_) => std::future::pending().await,
        }
    }

    /// Stop supervision and every supervised synchronizer
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let synchronizers: Vec<Arc<dyn Supervised>> = lock(&self.registry)
            .values()
            .map(|r| Arc::clone(&r.synchronizer))
            .collect();
        for synchronizer in synchronizers {
            synchronizer.stop();
        }
        info!("Overwatch shut down");
    }
}

/// Single task performing every (re)start requested by the monitors
async fn dispatch(
    registry: Registry,
    mut requests: mpsc::UnboundedReceiver<String>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let name = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => break,
            request = requests.recv() => match request {
                Some(name) => name,
                None => break,
            },
        };

        let synchronizer = {
            let mut registry = lock(&registry);
            let Some(registration) = registry.get_mut(&name) else {
                debug!(synchronizer = %name, "Restart requested for unknown synchronizer");
                continue;
            };
            registration.restarts += 1;
            Arc::clone(&registration.synchronizer)
        };

        metrics::increment_sync_restarts(&name);
        match synchronizer.start() {
            Ok(()) => info!(synchronizer = %name, "Synchronizer restarted"),
            Err(SyncError::AlreadyRunning(_)) => {
                debug!(synchronizer = %name, "Synchronizer already running")
            }
            Err(err) => error!(synchronizer = %name, error = %err, "Failed to restart synchronizer"),
        }
    }
    debug!("Overwatch dispatch loop stopped");
}

/// Watch one synchronizer's error channel and request restarts per policy
async fn monitor(
    name: String,
    policy: RestartPolicy,
    mut errors: mpsc::UnboundedReceiver<SyncError>,
    config: SupervisorConfig,
    restart_tx: mpsc::UnboundedSender<String>,
    mut shutdown: watch::Receiver<bool>,
    fatal: watch::Sender<Option<String>>,
) {
    let mut backoff = FibonacciBackoff::new(config.restart_min_delay, config.restart_max_delay);
    let mut started_at = Instant::now();

    loop {
        let err = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stopped| *stopped) => return,
            err = errors.recv() => match err {
                Some(err) => err,
                None => return,
            },
        };

        // A loop that stayed up longer than the largest delay starts over
        if started_at.elapsed() > backoff.max() {
            backoff.reset();
        }

        let Some(delay) = error_policy::restart_delay(&name, &err, &mut backoff) else {
            fatal.send_replace(Some(err.to_string()));
            return;
        };

        if policy == RestartPolicy::NeverRestart {
            info!(synchronizer = %name, "Restart policy is NeverRestart, leaving synchronizer stopped");
            return;
        }

        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = shutdown.wait_for(|stopped| *stopped) => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        if restart_tx.send(name.clone()).is_err() {
            return;
        }
        started_at = Instant::now();
    }
}
