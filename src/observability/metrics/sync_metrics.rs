//! # Synchronization Metrics
//!
//! Key holder secret events, key adoptions and synchronizer restarts.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{IntCounter, IntCounterVec};
use std::sync::LazyLock;

static SYNC_EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dashboard_auth_sync_events_total",
            "Total number of events received by synchronizers by event type",
        ),
        &["synchronizer", "event"],
    )
    .expect("Failed to create SYNC_EVENTS_TOTAL metric - this should never happen")
});

static SYNC_RESTARTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dashboard_auth_sync_restarts_total",
            "Total number of synchronizer restarts performed by the supervisor",
        ),
        &["synchronizer"],
    )
    .expect("Failed to create SYNC_RESTARTS_TOTAL metric - this should never happen")
});

static KEY_ADOPTIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "dashboard_auth_key_adoptions_total",
        "Total number of encryption keys adopted from the key holder secret",
    )
    .expect("Failed to create KEY_ADOPTIONS_TOTAL metric - this should never happen")
});

static SECRET_REPUBLICATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "dashboard_auth_secret_republications_total",
            "Total number of times the local key was written back to the key holder secret",
        ),
        &["cause"],
    )
    .expect("Failed to create SECRET_REPUBLICATIONS_TOTAL metric - this should never happen")
});

pub(crate) fn register_sync_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNC_EVENTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_RESTARTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(KEY_ADOPTIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_REPUBLICATIONS_TOTAL.clone()))?;
    Ok(())
}

pub fn increment_sync_events(synchronizer: &str, event: &str) {
    SYNC_EVENTS_TOTAL
        .with_label_values(&[synchronizer, event])
        .inc();
}

pub fn increment_sync_restarts(synchronizer: &str) {
    SYNC_RESTARTS_TOTAL.with_label_values(&[synchronizer]).inc();
}

pub fn increment_key_adoptions() {
    KEY_ADOPTIONS_TOTAL.inc();
}

/// `cause` is `recreate` (secret deleted) or `repair` (secret unparsable)
pub fn increment_secret_republications(cause: &str) {
    SECRET_REPUBLICATIONS_TOTAL.with_label_values(&[cause]).inc();
}
