//! # Server Configuration
//!
//! Where the HTTP surface listens and how long startup waits for it.

use super::env_var_or_default;

/// HTTP surface configuration (`METRICS_PORT`, `SERVER_*`)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port serving `/healthz`, `/readyz`, `/metrics` and the token refresh API.
    /// The token API shares it with the probes; it answers 503 until the key holder
    /// is initialized.
    pub metrics_port: u16,
    /// Seconds to wait for the listener to bind before startup fails
    pub startup_timeout_secs: u64,
    /// Milliseconds between checks of the listener during startup
    pub poll_interval_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: DEFAULT_METRICS_PORT,
            startup_timeout_secs: DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            poll_interval_ms: DEFAULT_SERVER_POLL_INTERVAL_MS,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            startup_timeout_secs: env_var_or_default(
                "SERVER_STARTUP_TIMEOUT_SECS",
                DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
            ),
            poll_interval_ms: env_var_or_default(
                "SERVER_POLL_INTERVAL_MS",
                DEFAULT_SERVER_POLL_INTERVAL_MS,
            ),
        }
    }
}
