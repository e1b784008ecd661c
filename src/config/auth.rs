//! # Authentication Configuration
//!
//! Settings for the key holder secret, token lifetime and synchronizer supervision.

use super::env_var_or_default;
use crate::jwe::KeyHolderConfig;
use crate::sync::SyncMode;
use std::str::FromStr;
use std::time::Duration;

/// Where the shared key holder secret is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStoreBackend {
    /// Kubernetes Secret in the configured namespace
    #[default]
    Kubernetes,
    /// Process-local store, for running outside a cluster
    Memory,
}

impl FromStr for KeyStoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kubernetes" | "k8s" => Ok(Self::Kubernetes),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(format!("unknown key store backend: {other}")),
        }
    }
}

/// Key holder and token manager configuration
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Namespace holding the key holder secret
    pub namespace: String,
    /// Name of the key holder secret
    pub secret_name: String,
    /// Token TTL in seconds, 0 disables expiry
    pub token_ttl_secs: u64,
    /// RSA modulus size for freshly generated keys
    pub key_bits: usize,
    /// Poll interval for the key holder secret, 0 selects the native watch
    pub poll_interval_secs: u64,
    /// Startup attempts for key holder initialization
    pub init_max_attempts: u32,
    /// Initial backoff between initialization attempts (milliseconds)
    pub init_backoff_ms: u64,
    /// Backend storing the secret
    pub backend: KeyStoreBackend,
}

impl Default for AuthConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            secret_name: DEFAULT_KEY_HOLDER_SECRET_NAME.to_string(),
            token_ttl_secs: DEFAULT_TOKEN_TTL_SECS,
            key_bits: DEFAULT_RSA_KEY_BITS,
            poll_interval_secs: DEFAULT_SECRET_POLL_INTERVAL_SECS,
            init_max_attempts: DEFAULT_KEY_INIT_MAX_ATTEMPTS,
            init_backoff_ms: DEFAULT_KEY_INIT_BACKOFF_MS,
            backend: KeyStoreBackend::default(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            namespace: std::env::var("POD_NAMESPACE")
                .ok()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
            secret_name: std::env::var("KEY_HOLDER_SECRET_NAME")
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| DEFAULT_KEY_HOLDER_SECRET_NAME.to_string()),
            token_ttl_secs: env_var_or_default("TOKEN_TTL", DEFAULT_TOKEN_TTL_SECS),
            key_bits: env_var_or_default("RSA_KEY_BITS", DEFAULT_RSA_KEY_BITS),
            poll_interval_secs: env_var_or_default(
                "SECRET_POLL_INTERVAL_SECS",
                DEFAULT_SECRET_POLL_INTERVAL_SECS,
            ),
            init_max_attempts: env_var_or_default(
                "KEY_INIT_MAX_ATTEMPTS",
                DEFAULT_KEY_INIT_MAX_ATTEMPTS,
            ),
            init_backoff_ms: env_var_or_default("KEY_INIT_BACKOFF_MS", DEFAULT_KEY_INIT_BACKOFF_MS),
            backend: env_var_or_default("KEY_STORE_BACKEND", KeyStoreBackend::default()),
        }
    }

    /// How the synchronizer should observe the key holder secret
    pub fn sync_mode(&self) -> SyncMode {
        if self.poll_interval_secs == 0 {
            SyncMode::Watch
        } else {
            SyncMode::Poll(Duration::from_secs(self.poll_interval_secs))
        }
    }

    /// Key holder settings derived from this configuration
    pub fn key_holder_config(&self) -> KeyHolderConfig {
        KeyHolderConfig {
            key_bits: self.key_bits,
            init_max_attempts: self.init_max_attempts.max(1),
            init_backoff: Duration::from_millis(self.init_backoff_ms),
        }
    }
}

/// Overwatch restart policy tuning
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Lower bound for the delay before restarting a failed synchronizer
    pub restart_min_delay: Duration,
    /// Upper bound for the delay before restarting a failed synchronizer
    pub restart_max_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            restart_min_delay: Duration::from_millis(DEFAULT_SYNC_RESTART_MIN_DELAY_MS),
            restart_max_delay: Duration::from_millis(DEFAULT_SYNC_RESTART_MAX_DELAY_MS),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        let min = env_var_or_default("SYNC_RESTART_MIN_DELAY_MS", DEFAULT_SYNC_RESTART_MIN_DELAY_MS);
        let max = env_var_or_default("SYNC_RESTART_MAX_DELAY_MS", DEFAULT_SYNC_RESTART_MAX_DELAY_MS);
        Self {
            restart_min_delay: Duration::from_millis(min),
            restart_max_delay: Duration::from_millis(max.max(min)),
        }
    }
}
