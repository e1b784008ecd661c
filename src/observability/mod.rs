//! # Observability
//!
//! Prometheus metrics for token handling and secret synchronization.

pub mod metrics;
