//! # Constants
//!
//! Default values shared by configuration loading and the key holder secret layout.

/// Namespace the key holder secret lives in when `POD_NAMESPACE` is unset
pub const DEFAULT_NAMESPACE: &str = "kubernetes-dashboard";

/// Well-known name of the secret that stores the shared encryption key
pub const DEFAULT_KEY_HOLDER_SECRET_NAME: &str = "kubernetes-dashboard-key-holder";

/// Secret data key holding the PKCS#1 PEM private key
pub const KEY_HOLDER_PRIVATE_KEY_ENTRY: &str = "priv";

/// Secret data key holding the PKIX PEM public key
pub const KEY_HOLDER_PUBLIC_KEY_ENTRY: &str = "pub";

/// Default token time-to-live (15 minutes)
pub const DEFAULT_TOKEN_TTL_SECS: u64 = 900;

/// Default RSA modulus size for generated keys
pub const DEFAULT_RSA_KEY_BITS: usize = 2048;

/// Default interval between polls of the key holder secret
pub const DEFAULT_SECRET_POLL_INTERVAL_SECS: u64 = 5;

/// Default number of attempts to initialize the key holder before giving up
pub const DEFAULT_KEY_INIT_MAX_ATTEMPTS: u32 = 5;

/// Default initial backoff between key holder initialization attempts
pub const DEFAULT_KEY_INIT_BACKOFF_MS: u64 = 500;

/// Default lower bound for synchronizer restart backoff
pub const DEFAULT_SYNC_RESTART_MIN_DELAY_MS: u64 = 1_000;

/// Default upper bound for synchronizer restart backoff
pub const DEFAULT_SYNC_RESTART_MAX_DELAY_MS: u64 = 60_000;

/// Default HTTP port for metrics, probes and the token API
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// How long to wait for the HTTP server to bind before failing startup
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// How often to check whether the HTTP server is ready during startup
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Default tracing filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "dashboard_auth=info";
