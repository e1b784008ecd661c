//! Shared fixtures for integration tests: an in-process object store standing in
//! for the cluster, small keys and short delays.

#![allow(dead_code, unused_macros, reason = "each test binary uses a different subset")]

use dashboard_auth::config::{AuthConfig, SupervisorConfig};
use dashboard_auth::jwe::KeyHolderConfig;
use dashboard_auth::sync::{MemoryObjectClient, SyncMode, Synchronizer};
use k8s_openapi::api::core::v1::Secret;
use std::sync::Arc;
use std::time::Duration;

pub type Store = MemoryObjectClient<Secret>;

pub const NAMESPACE: &str = "kubernetes-dashboard";
pub const SECRET_NAME: &str = "kubernetes-dashboard-key-holder";
pub const TEST_KEY_BITS: usize = 1024;

pub fn key_holder_config() -> KeyHolderConfig {
    KeyHolderConfig {
        key_bits: TEST_KEY_BITS,
        init_max_attempts: 3,
        init_backoff: Duration::from_millis(10),
    }
}

pub fn supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        restart_min_delay: Duration::from_millis(10),
        restart_max_delay: Duration::from_millis(50),
    }
}

/// Native watch on the in-process store, so events arrive as soon as they happen
pub fn auth_config(token_ttl_secs: u64) -> AuthConfig {
    AuthConfig {
        namespace: NAMESPACE.to_string(),
        secret_name: SECRET_NAME.to_string(),
        token_ttl_secs,
        key_bits: TEST_KEY_BITS,
        poll_interval_secs: 0,
        init_max_attempts: 3,
        init_backoff_ms: 10,
        ..AuthConfig::default()
    }
}

pub fn synchronizer(store: &Arc<Store>, mode: SyncMode) -> Arc<Synchronizer<Store>> {
    Synchronizer::new(Arc::clone(store), NAMESPACE, SECRET_NAME, mode)
}

/// Re-evaluate a condition (which may `.await`) until it holds, failing the test
/// after five seconds
macro_rules! eventually {
    ($condition:expr) => {
        let waited = tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !$condition {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(waited.is_ok(), "condition not met within 5 seconds: {}", stringify!($condition));
    };
}
