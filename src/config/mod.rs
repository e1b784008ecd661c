//! # Service Configuration
//!
//! Configuration loaded from environment variables (populated from a ConfigMap or the
//! deployment manifest). Every setting has a default and can be overridden per replica.

mod auth;
mod server;

pub use auth::{AuthConfig, KeyStoreBackend, SupervisorConfig};
pub use server::ServerConfig;

use tracing::warn;

/// Load all configuration sections from environment variables with defaults
pub fn load_config() -> (AuthConfig, SupervisorConfig, ServerConfig) {
    (
        AuthConfig::from_env(),
        SupervisorConfig::from_env(),
        ServerConfig::from_env(),
    )
}

/// Read environment variable or return default value.
///
/// A value that is set but does not parse is logged and replaced by the default.
pub(crate) fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    match parse_setting(std::env::var(key).ok().as_deref()) {
        Ok(Some(value)) => value,
        Ok(None) => default,
        Err(err) => {
            warn!(
                variable = key,
                error = ?err,
                "Ignoring invalid configuration value, using the default"
            );
            default
        }
    }
}

/// Parse an optional raw setting; unset and empty both mean "not configured"
fn parse_setting<T: std::str::FromStr>(raw: Option<&str>) -> Result<Option<T>, T::Err> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some),
    }
}
