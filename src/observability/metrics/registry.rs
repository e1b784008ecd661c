//! # Metrics Registry
//!
//! Prometheus metrics registry setup and registration.

use anyhow::{Context, Result};
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::LazyLock;

/// Global Prometheus metrics registry
pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Register all metrics with the Prometheus registry.
///
/// Metrics are cloned into the registry; clones share the underlying counters.
#[allow(
    clippy::missing_errors_doc,
    reason = "Fails only when a metric is registered twice"
)]
pub fn register_metrics() -> Result<()> {
    super::token_metrics::register_token_metrics()?;
    super::sync_metrics::register_sync_metrics()?;
    Ok(())
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not UTF-8")
}
