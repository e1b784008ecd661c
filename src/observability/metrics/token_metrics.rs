//! # Token Metrics

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec};
use std::sync::LazyLock;

static TOKENS_GENERATED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dashboard_auth_tokens_generated_total",
        "Total number of tokens issued (login and refresh)",
    )
    .expect("Failed to create TOKENS_GENERATED_TOTAL metric - this should never happen")
});

static TOKEN_FAILURES_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dashboard_auth_token_failures_total",
            "Total number of rejected tokens by reason",
        ),
        &["reason"],
    )
    .expect("Failed to create TOKEN_FAILURES_TOTAL metric - this should never happen")
});

pub(crate) fn register_token_metrics() -> Result<()> {
    REGISTRY.register(Box::new(TOKENS_GENERATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(TOKEN_FAILURES_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_tokens_generated() {
    TOKENS_GENERATED_TOTAL.inc();
}

/// `reason` is the stable reason string of the token error
pub fn increment_token_failures(reason: &str) {
    TOKEN_FAILURES_TOTAL.with_label_values(&[reason]).inc();
}
